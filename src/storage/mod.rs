pub mod convert;
mod csv_store;

pub use csv_store::{
    read_coordinates, read_endpoints, read_locations, read_posts, write_coordinates,
    write_endpoints, write_locations, write_posts,
};
