//! Docker image management for the language sandboxes.

use anyhow::{Context, Result};
use bollard::image::{CreateImageOptions, ListImagesOptions};
use bollard::service::ImageSummary;
use bollard::Docker;
use clap::Subcommand;
use colored::Colorize;
use futures_util::StreamExt;
use tracing::{info, warn};

use crate::config::Config;
use crate::domain::Language;
use crate::language::LanguageRegistry;

/// Image management actions.
#[derive(Subcommand, Debug)]
pub enum ImageAction {
    /// Pull sandbox images from their registry
    Pull {
        /// Only pull the image for this language (e.g. cpp_17)
        #[arg(long)]
        language: Option<Language>,

        /// Force pull even if image exists locally
        #[arg(long, default_value = "false")]
        force: bool,
    },

    /// Show which sandbox images are available locally
    Status,
}

/// Run image management command.
pub async fn run(config: &Config, action: ImageAction) -> Result<()> {
    let registry = LanguageRegistry::from_config(config)?;
    let docker = connect().await?;

    match action {
        ImageAction::Pull { language, force } => {
            for image in images_for(&registry, language) {
                pull_image(&docker, &image, force).await?;
            }
        }
        ImageAction::Status => {
            show_image_status(&docker, &registry).await?;
        }
    }

    Ok(())
}

async fn connect() -> Result<Docker> {
    let docker = Docker::connect_with_local_defaults()
        .context("Failed to connect to Docker. Is Docker running?")?;

    docker
        .ping()
        .await
        .context("Cannot ping Docker daemon. Is Docker running?")?;

    Ok(docker)
}

/// Distinct images to act on, in registry order.
fn images_for(registry: &LanguageRegistry, language: Option<Language>) -> Vec<String> {
    let mut images: Vec<String> = Vec::new();
    for lc in registry.iter() {
        if language.is_some_and(|l| l != lc.language) {
            continue;
        }
        if !images.contains(&lc.image) {
            images.push(lc.image.clone());
        }
    }
    images
}

async fn list_images(docker: &Docker) -> Result<Vec<ImageSummary>> {
    docker
        .list_images(Some(ListImagesOptions::<String> {
            all: true,
            ..Default::default()
        }))
        .await
        .context("Failed to list images")
}

/// Pull Docker image from registry, skipping images already present unless forced.
async fn pull_image(docker: &Docker, image: &str, force: bool) -> Result<()> {
    if !force && find_image(&list_images(docker).await?, image).is_some() {
        info!(
            "Image '{}' found locally. Skipping pull (use --force to override).",
            image
        );
        println!("Image '{image}' already exists locally.");
        return Ok(());
    }

    let pull_options = CreateImageOptions {
        from_image: image,
        ..Default::default()
    };

    let mut stream = docker.create_image(Some(pull_options), None, None);

    info!("Pulling image {}...", image);
    let mut last_output = String::new();

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(output) => {
                if let Some(status) = &output.status {
                    let trimmed = status.trim();
                    if !trimmed.is_empty() {
                        println!("{trimmed}");
                        last_output = trimmed.to_string();
                    }
                } else if let Some(error) = &output.error {
                    anyhow::bail!("Docker pull error: {error}");
                }
            }
            Err(e) => anyhow::bail!("Error pulling image {image}: {e}"),
        }
    }

    if last_output.contains("Downloaded") || last_output.contains("up to date") {
        info!("Image pulled successfully: {}", image);
    } else {
        warn!("Pull of {} completed, but success message not found.", image);
    }

    Ok(())
}

/// Show one line per language with its image and local availability.
async fn show_image_status(docker: &Docker, registry: &LanguageRegistry) -> Result<()> {
    let images = list_images(docker).await?;

    println!("\n{}", "Sandbox images".bold());
    let mut missing = false;
    for lc in registry.iter() {
        match find_image(&images, &lc.image) {
            Some(summary) => println!(
                "  {} {:<12} {} ({})",
                "✓".green(),
                lc.language.to_string(),
                lc.image,
                format_size(summary.size)
            ),
            None => {
                missing = true;
                println!(
                    "  {} {:<12} {} (not found)",
                    "✗".red(),
                    lc.language.to_string(),
                    lc.image
                );
            }
        }
    }

    if missing {
        println!("\nTo pull missing images, run:");
        println!("  autojudge image pull");
    }

    Ok(())
}

fn find_image<'a>(images: &'a [ImageSummary], image: &str) -> Option<&'a ImageSummary> {
    let (name, tag) = parse_image_tag(image);
    images.iter().find(|img| {
        img.repo_tags.iter().any(|tag_str| {
            let (n, t) = parse_image_tag(tag_str);
            n == name && t == tag
        })
    })
}

fn format_size(bytes: i64) -> String {
    // Precision loss is acceptable for display purposes
    #[allow(clippy::cast_precision_loss)]
    let size_megabytes = bytes.unsigned_abs() as f64 / 1_048_576.0;
    let size_gigabytes = size_megabytes / 1024.0;
    if size_gigabytes >= 1.0 {
        format!("{size_gigabytes:.2} GB")
    } else {
        format!("{size_megabytes:.2} MB")
    }
}

/// Parse image name and tag from a string.
fn parse_image_tag(image: &str) -> (&str, &str) {
    match image.rfind(':') {
        Some(colon_pos) if !image[colon_pos + 1..].contains('/') => {
            let (name, tag) = image.split_at(colon_pos);
            (name, &tag[1..])
        }
        _ => (image, "latest"),
    }
}
