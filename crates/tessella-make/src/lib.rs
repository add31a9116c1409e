//! # Tessella Make
//!
//! Command-line builder that packs a source image into a Tessella VTFF
//! page file, the input of the streaming runtime.
//!
//! ```text
//! tessella-make <input_image> <output_vtff> [--flags]
//! ```
//!
//! Boolean flags accept `=true/yes/1` (or no value) and `=false/no/0`.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

pub mod builder;
pub mod filters;
pub mod float_image;
pub mod mipmapper;

use builder::{PageFileBuilder, PageFileBuilderOptions};
use filters::FilterKind;

/// Build a virtual texture page file from a source image
#[derive(Parser)]
#[command(name = "tessella-make")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Source image (PNG, JPEG or TGA)
    pub input: PathBuf,

    /// Output page file
    pub output: PathBuf,

    /// Mipmapping filter
    #[arg(long, value_enum, default_value = "box")]
    pub filter: FilterKind,

    /// Total page size in pixels, border included
    #[arg(long = "page_size", default_value_t = 128)]
    pub page_size: u32,

    /// Page content size in pixels, border excluded
    #[arg(long = "content_size", default_value_t = 120)]
    pub content_size: u32,

    /// Page border size in pixels
    #[arg(long = "border_size", default_value_t = 4)]
    pub border_size: u32,

    /// Maximum mipmap levels to generate
    #[arg(long = "max_levels", default_value_t = 16)]
    pub max_levels: u32,

    /// Flip the source image vertically
    #[arg(long = "flip_v_src", value_parser = parse_flag, num_args = 0..=1, require_equals = true, default_value = "false", default_missing_value = "true")]
    pub flip_v_src: bool,

    /// Flip each individual tile vertically
    #[arg(long = "flip_v_tiles", value_parser = parse_flag, num_args = 0..=1, require_equals = true, default_value = "false", default_missing_value = "true")]
    pub flip_v_tiles: bool,

    /// Stop subdividing once a level no longer fills a page
    #[arg(long = "stop_on_1_mip", value_parser = parse_flag, num_args = 0..=1, require_equals = true, default_value = "false", default_missing_value = "true")]
    pub stop_on_1_mip: bool,

    /// Stamp coordinates and a border onto every dumped page
    #[arg(long = "add_debug_info", value_parser = parse_flag, num_args = 0..=1, require_equals = true, default_value = "false", default_missing_value = "true")]
    pub add_debug_info: bool,

    /// Dump each page as an image file
    #[arg(long = "dump_images", value_parser = parse_flag, num_args = 0..=1, require_equals = true, default_value = "false", default_missing_value = "true")]
    pub dump_images: bool,

    /// Chatty output while running
    #[arg(long, value_parser = parse_flag, num_args = 0..=1, require_equals = true, default_value = "false", default_missing_value = "true")]
    pub verbose: bool,
}

/// The loose boolean syntax the builder has always accepted: everything but
/// an explicit no reads as yes.
fn parse_flag(raw: &str) -> Result<bool, std::convert::Infallible> {
    Ok(!matches!(raw, "false" | "no" | "0"))
}

/// Execute the builder.
pub fn execute(cli: Cli) -> Result<()> {
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let options = PageFileBuilderOptions {
        filter: cli.filter,
        page_size: cli.page_size,
        content_size: cli.content_size,
        border_size: cli.border_size,
        max_levels: cli.max_levels,
        flip_v_src: cli.flip_v_src,
        flip_v_tiles: cli.flip_v_tiles,
        stop_on_1_mip: cli.stop_on_1_mip,
        add_debug_info: cli.add_debug_info,
        dump_images: cli.dump_images,
    };
    log::debug!("Builder options: {options:#?}");

    let mut builder = PageFileBuilder::new(&cli.input, &cli.output, options)?;
    builder.generate_page_file()?;

    log::info!("Done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["tessella-make", "in.png", "out.vt"]);
        assert_eq!(cli.filter, FilterKind::Box);
        assert_eq!(cli.page_size, 128);
        assert_eq!(cli.content_size, 120);
        assert_eq!(cli.border_size, 4);
        assert_eq!(cli.max_levels, 16);
        assert!(!cli.flip_v_src);
        assert!(!cli.verbose);
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::parse_from([
            "tessella-make",
            "in.png",
            "out.vt",
            "--filter=lanczos",
            "--page_size=128",
            "--max_levels=8",
            "--stop_on_1_mip",
            "--add_debug_info=yes",
            "--dump_images=false",
            "--verbose=1",
        ]);
        assert_eq!(cli.filter, FilterKind::Lanczos);
        assert_eq!(cli.max_levels, 8);
        assert!(cli.stop_on_1_mip);
        assert!(cli.add_debug_info);
        assert!(!cli.dump_images);
        assert!(cli.verbose);
    }

    #[test]
    fn test_flag_parsing() {
        for yes in ["true", "yes", "1", "", "anything"] {
            assert!(parse_flag(yes).unwrap(), "{yes:?} should read as true");
        }
        for no in ["false", "no", "0"] {
            assert!(!parse_flag(no).unwrap(), "{no:?} should read as false");
        }
    }
}
