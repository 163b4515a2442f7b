use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[cfg(feature = "gui")]
const GUI_INFO: &str = "eframe 0.33";
#[cfg(not(feature = "gui"))]
const GUI_INFO: &str = "disabled";

// Build version with front-end info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "GUI:    ", GUI_INFO, "\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Live raster effects: run and edit effects against an in-memory host
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable logging to file (default: livefx.log in the data dir)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE", global = true)]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR", global = true)]
    pub config_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the registered effects
    List,

    /// Run one effect on an image file
    Apply {
        /// Effect id (e.g. gaussian-blur)
        #[arg(short = 'e', long = "effect")]
        effect: String,

        /// Input image (PNG, JPEG, TIFF, TGA)
        #[arg(short = 'i', long = "input", value_name = "FILE")]
        input: PathBuf,

        /// Output image
        #[arg(short = 'o', long = "output", value_name = "FILE")]
        output: PathBuf,

        /// Effect params as a JSON object
        #[arg(short = 'p', long = "params", value_name = "JSON")]
        params: Option<String>,

        /// Effects resolution the host rasterizes at
        #[arg(long = "dpi", value_name = "N", default_value_t = 72.0)]
        dpi: f64,
    },

    /// Open the parameter dialog for an effect and print the result
    Edit {
        /// Effect id (e.g. outline)
        #[arg(short = 'e', long = "effect")]
        effect: String,

        /// Initial params as a JSON object
        #[arg(short = 'p', long = "params", value_name = "JSON")]
        params: Option<String>,

        /// Treat the effect as newly inserted (Cancel undoes it)
        #[arg(long = "new")]
        new_instance: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_apply() {
        let args = Args::parse_from([
            "livefx", "-vv", "apply", "-e", "outline", "-i", "in.png", "-o", "out.png", "--dpi", "144",
        ]);
        assert_eq!(args.verbosity, 2);
        match args.command {
            Command::Apply { effect, dpi, params, .. } => {
                assert_eq!(effect, "outline");
                assert_eq!(dpi, 144.0);
                assert!(params.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_log_flag_optional_value() {
        let args = Args::parse_from(["livefx", "list", "--log"]);
        assert!(matches!(args.log_file, Some(None)));
        assert!(matches!(args.command, Command::List));
    }
}
