//! Build script for roleguard
//!
//! Embeds build-time information (version, git commit) used by the
//! `meta-data` manifest.

fn main() {
    // Embed git commit, build time, and dirty status
    shadow_rs::ShadowBuilder::builder()
        .build()
        .expect("Failed to generate build info");
}
