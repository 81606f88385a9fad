//! Generate a repo of virtual machine templates from image specs.
//!
//! A spec is a virt-builder commands file with `#property=value` lines:
//!
//! ```text
//! #property1=value1
//! #property2=value2
//! command1
//! command2
//! ```
//!
//! Each spec is built into a compressed disk image and the repo gets lago
//! and/or virt-builder metadata describing the images.
#![warn(missing_docs)]
#![deny(clippy::pedantic)]
#![deny(clippy::nursery)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::use_self)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

mod command;

mod config;
use config::BuildConfig;

mod hash;

mod image;

mod lago;

mod repo;
use repo::{RepoRequest, generate_repo, resolve_specs};

mod report;

mod spec;
use spec::RepoFormat;

mod utils;

mod virt_builder;

const DEFAULT_SPECS_DIR: &str = "image-specs";
const DEFAULT_REPO_DIR: &str = "image-repo";

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = "Build a repo of VM templates")]
struct Args {
    /// Log debug messages with their source location.
    #[clap(long, short = 'v')]
    verbose: bool,

    /// Type of image repo to generate.
    #[clap(long, short = 'f', value_enum, default_value_t = RepoFormat::All)]
    repo_format: RepoFormat,

    /// Path to a specs directory or a single spec file, can be passed more
    /// than once. Defaults to ./image-specs.
    #[clap(long, short = 's')]
    specs: Vec<PathBuf>,

    /// Path to generate the repo in.
    #[clap(long, short = 'o', default_value = DEFAULT_REPO_DIR)]
    repo_dir: PathBuf,

    /// Do not update the image OS with yum/dnf/apt-get.
    #[clap(long = "dont-update-images-os")]
    dont_update_images_os: bool,

    /// Base url the repo will be served from, written to repo.metadata.
    #[clap(long, value_parser = parse_base_url)]
    base_url: String,

    /// Name for the repo, used by the lago metadata.
    #[clap(long)]
    repo_name: String,

    /// YAML file with tool paths, root password and compression settings.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Root password for the generated images.
    #[clap(long)]
    root_password: Option<String>,
}

fn parse_base_url(s: &str) -> Result<String, url::ParseError> {
    url::Url::parse(s)?;
    Ok(s.to_string())
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_file(verbose)
        .with_line_number(verbose)
        .init();
}

fn load_config(args: &Args) -> Result<BuildConfig> {
    let mut config = match &args.config {
        Some(path) => BuildConfig::load(path)?,
        None => BuildConfig::default(),
    };
    if let Some(root_password) = &args.root_password {
        config.root_password.clone_from(root_password);
    }
    Ok(config)
}

async fn do_task(args: &Args) -> Result<()> {
    let config = load_config(args).context("Cannot load build config")?;
    debug!("{config:?}");

    let spec_paths = if args.specs.is_empty() {
        vec![PathBuf::from(".").join(DEFAULT_SPECS_DIR)]
    } else {
        args.specs.clone()
    };
    let specs = resolve_specs(&spec_paths).await?;

    let request = RepoRequest {
        specs: &specs,
        repo_dir: &args.repo_dir,
        base_url: &args.base_url,
        repo_name: &args.repo_name,
        format: args.repo_format,
        with_update: !args.dont_update_images_os,
    };
    let images = generate_repo(&request, &config).await?;

    if !images.is_empty() {
        println!("\n\n{}", report::images_to_string(&images));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    debug!("{args:?}");

    let rc = do_task(&args).await;

    if let Err(err) = &rc {
        error!("ERROR: {}", err);
        let err_list = err.chain().skip(1);
        for cause in err_list {
            error!("because: {}", cause);
        }
    }

    rc
}
