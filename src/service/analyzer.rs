use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::Path;

use crate::domain::models::{Gender, Post};
use crate::error::{AppError, Result};
use crate::storage;

const TOP_USER_COUNT: usize = 5;

#[derive(Debug, Clone)]
pub struct TopUser {
    pub screen_name: String,
    pub followers_display: String,
    pub location: String,
}

/// Aggregate view over a collected dataset, mirroring the columns the
/// collector writes.
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub total_posts: usize,
    pub location_count: usize,
    pub unique_users: usize,
    pub top_users: Vec<TopUser>,
    pub avg_likes: f64,
    pub avg_comments: f64,
    pub avg_reposts: f64,
    pub posts_with_images: usize,
    pub verified_posts: usize,
    pub retweeted_posts: usize,
    pub long_text_posts: usize,
    pub location_distribution: Vec<(String, usize)>,
    pub gender_distribution: Vec<(String, usize)>,
}

impl AnalysisReport {
    /// Builds the report from collected posts. An empty dataset is an
    /// error; every percentage below would be meaningless.
    pub fn build(posts: &[Post]) -> Result<Self> {
        if posts.is_empty() {
            return Err(AppError::service("analyzer", "no posts to analyze"));
        }

        let total = posts.len();

        let location_count = posts
            .iter()
            .map(|p| p.location.as_str())
            .collect::<HashSet<_>>()
            .len();
        let unique_users = posts
            .iter()
            .map(|p| p.screen_name.as_str())
            .collect::<HashSet<_>>()
            .len();

        // Accounts whose follower count is a display string rather than a
        // number cannot be ranked and are left out.
        let mut ranked: Vec<(&Post, f64)> = posts
            .iter()
            .filter_map(|p| p.followers_numeric().map(|n| (p, n)))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        let top_users = ranked
            .iter()
            .take(TOP_USER_COUNT)
            .map(|(post, _)| TopUser {
                screen_name: post.screen_name.clone(),
                followers_display: post.followers_count.clone(),
                location: post.location.clone(),
            })
            .collect();

        let avg_likes = mean(posts.iter().map(|p| p.attitudes_count));
        let avg_comments = mean(posts.iter().map(|p| p.comments_count));
        let avg_reposts = mean(posts.iter().map(|p| p.reposts_count));

        let posts_with_images = posts.iter().filter(|p| p.pic_num > 0).count();
        let verified_posts = posts.iter().filter(|p| p.verified).count();
        let retweeted_posts = posts.iter().filter(|p| p.retweeted_status).count();
        let long_text_posts = posts.iter().filter(|p| p.is_long_text).count();

        let location_distribution =
            count_sorted(posts.iter().map(|p| p.location.clone()));
        let gender_distribution =
            count_sorted(posts.iter().map(|p| gender_label(&p.gender)));

        Ok(Self {
            total_posts: total,
            location_count,
            unique_users,
            top_users,
            avg_likes,
            avg_comments,
            avg_reposts,
            posts_with_images,
            verified_posts,
            retweeted_posts,
            long_text_posts,
            location_distribution,
            gender_distribution,
        })
    }

    /// Reads a collected CSV and builds the report from it.
    pub fn from_file(path: &Path) -> Result<Self> {
        let posts = storage::read_posts(path)?;
        Self::build(&posts)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "{}", "=".repeat(50));
        let _ = writeln!(out, "DATA ANALYSIS");
        let _ = writeln!(out, "{}", "=".repeat(50));
        let _ = writeln!(out, "Total posts collected: {}", self.total_posts);
        let _ = writeln!(out, "Locations: {}", self.location_count);
        let _ = writeln!(out, "Unique users: {}", self.unique_users);

        let _ = writeln!(out, "\nTop {} users by followers:", TOP_USER_COUNT);
        for user in &self.top_users {
            let _ = writeln!(
                out,
                "  {}: {} followers ({})",
                user.screen_name, user.followers_display, user.location
            );
        }

        let _ = writeln!(out, "\nEngagement Statistics:");
        let _ = writeln!(out, "  Average likes: {:.1}", self.avg_likes);
        let _ = writeln!(out, "  Average comments: {:.1}", self.avg_comments);
        let _ = writeln!(out, "  Average reposts: {:.1}", self.avg_reposts);
        let _ = writeln!(
            out,
            "  Posts with images: {} ({:.1}%)",
            self.posts_with_images,
            self.percentage(self.posts_with_images)
        );
        let _ = writeln!(
            out,
            "  Posts from verified users: {} ({:.1}%)",
            self.verified_posts,
            self.percentage(self.verified_posts)
        );
        let _ = writeln!(
            out,
            "  Retweeted posts: {} ({:.1}%)",
            self.retweeted_posts,
            self.percentage(self.retweeted_posts)
        );
        let _ = writeln!(
            out,
            "  Long text posts: {} ({:.1}%)",
            self.long_text_posts,
            self.percentage(self.long_text_posts)
        );

        let _ = writeln!(out, "\nLocation Distribution:");
        for (location, count) in &self.location_distribution {
            let _ = writeln!(out, "  {}: {} posts", location, count);
        }

        let _ = writeln!(out, "\nGender Distribution:");
        for (gender, count) in &self.gender_distribution {
            let _ = writeln!(out, "  {}: {} posts", gender, count);
        }

        out
    }

    fn percentage(&self, count: usize) -> f64 {
        count as f64 / self.total_posts as f64 * 100.0
    }
}

fn mean(values: impl Iterator<Item = i64>) -> f64 {
    let mut sum = 0i64;
    let mut count = 0usize;
    for value in values {
        sum += value;
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}

/// Counts occurrences and sorts descending by count; ties keep first-seen
/// order.
fn count_sorted(values: impl Iterator<Item = String>) -> Vec<(String, usize)> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: Vec<usize> = Vec::new();

    for value in values {
        match order.iter().position(|v| v == &value) {
            Some(idx) => counts[idx] += 1,
            None => {
                order.push(value);
                counts.push(1);
            }
        }
    }

    let mut combined: Vec<(String, usize)> = order.into_iter().zip(counts).collect();
    combined.sort_by(|a, b| b.1.cmp(&a.1));
    combined
}

/// Display label for the raw gender code. Unrecognized codes pass through
/// so unexpected values stay visible in the report.
fn gender_label(code: &str) -> String {
    match code {
        "m" | "f" | "" => Gender::from_code(code).display_name().to_string(),
        other => other.to_string(),
    }
}
