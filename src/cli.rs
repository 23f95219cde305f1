use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::AppConfig;

/// Camera pose tracking that streams body keypoints over OSC.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List capture devices and their indices
    Cameras,
    /// Track poses from a camera until interrupted
    Run(RunArgs),
    /// Run the pipeline once on a still image
    Image(ImageArgs),
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// TOML settings file; flags below override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub common: CommonArgs,

    /// Camera index
    #[arg(long)]
    pub camera: Option<u32>,

    /// Write the latest annotated frame here about once per second
    #[arg(long)]
    pub preview: Option<PathBuf>,

    /// Stop after this many processed frames
    #[arg(long)]
    pub max_frames: Option<u64>,
}

#[derive(Args, Debug)]
pub struct ImageArgs {
    /// Image to run pose detection on
    pub input: PathBuf,

    /// Where to save the annotated image
    #[arg(short, long, default_value = "annotated.png")]
    pub output: PathBuf,

    /// TOML settings file; flags below override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Flags shared by every subcommand that runs the pipeline.
#[derive(Args, Debug, Default)]
pub struct CommonArgs {
    /// Path to a YOLO pose ONNX model
    #[arg(short, long)]
    pub model: Option<PathBuf>,

    /// Broadcast keypoints over OSC
    #[arg(long, default_value_t = false)]
    pub osc: bool,

    /// OSC receiver host
    #[arg(long)]
    pub osc_host: Option<String>,

    /// OSC receiver port
    #[arg(long)]
    pub osc_port: Option<u16>,

    /// Do not log every outgoing OSC message
    #[arg(long, default_value_t = false)]
    pub quiet_osc: bool,
}

impl CommonArgs {
    /// Overlays the flags that were actually given onto `config`.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(model) = &self.model {
            config.model.path = Some(model.to_string_lossy().into_owned());
        }
        if self.osc {
            config.osc.enabled = true;
        }
        if let Some(host) = &self.osc_host {
            config.osc.host = host.clone();
        }
        if let Some(port) = self.osc_port {
            config.osc.port = port;
        }
        if self.quiet_osc {
            config.osc.log_messages = false;
        }
    }
}

impl RunArgs {
    pub fn resolve_config(&self) -> anyhow::Result<AppConfig> {
        let mut config = load_or_default(self.config.as_ref())?;
        self.common.apply(&mut config);
        if let Some(index) = self.camera {
            config.camera.index = index;
        }
        Ok(config)
    }
}

impl ImageArgs {
    pub fn resolve_config(&self) -> anyhow::Result<AppConfig> {
        let mut config = load_or_default(self.config.as_ref())?;
        self.common.apply(&mut config);
        Ok(config)
    }
}

fn load_or_default(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(path),
        None => Ok(AppConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "pose-relay",
            "run",
            "--camera",
            "2",
            "--osc",
            "--osc-port",
            "9000",
            "--quiet-osc",
            "--max-frames",
            "10",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.max_frames, Some(10));

        let config = args.resolve_config().unwrap();
        assert_eq!(config.camera.index, 2);
        assert!(config.osc.enabled);
        assert_eq!(config.osc.host, "127.0.0.1");
        assert_eq!(config.osc.port, 9000);
        assert!(!config.osc.log_messages);
    }

    #[test]
    fn absent_flags_leave_config_alone() {
        let mut config = AppConfig::default();
        config.osc.enabled = true;
        config.osc.host = "10.0.0.5".to_string();

        CommonArgs::default().apply(&mut config);
        assert!(config.osc.enabled);
        assert_eq!(config.osc.host, "10.0.0.5");
        assert!(config.osc.log_messages);
        assert_eq!(config.model.path, None);
    }

    #[test]
    fn image_takes_positional_input() {
        let cli = Cli::try_parse_from(["pose-relay", "image", "person.jpg", "-m", "m.onnx"]).unwrap();
        let Commands::Image(args) = cli.command else {
            panic!("expected image");
        };
        assert_eq!(args.input, PathBuf::from("person.jpg"));
        assert_eq!(args.output, PathBuf::from("annotated.png"));
        assert_eq!(
            args.resolve_config().unwrap().model.path.as_deref(),
            Some("m.onnx")
        );
    }

    #[test]
    fn invalid_port_is_a_parse_error() {
        assert!(Cli::try_parse_from(["pose-relay", "run", "--osc-port", "70000"]).is_err());
    }
}
