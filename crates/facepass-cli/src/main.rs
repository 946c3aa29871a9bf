use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use facepass_core::config::{Config, CONTINUOUS_PROFILE, LOGIN_PROFILE};
use facepass_core::decode::{decode_data_url, decode_image};
use facepass_core::detector::CascadeDetector;
use facepass_core::{AuthDecision, AuthPipeline, AuthorizationEngine, ConfigError, FaceLocalizer, RawFrame, ResultRenderer};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "facepass", about = "Facepass face authentication CLI")]
struct Cli {
    /// Configuration file (TOML); defaults plus FACEPASS_* overrides when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Input {
    /// Image file, or `-` for stdin
    image: PathBuf,
    /// The input is a base64 data URL rather than encoded image bytes
    #[arg(long)]
    data_url: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Decide whether the face in a frame is an authorized identity
    Authorize {
        #[command(flatten)]
        input: Input,
        /// Policy profile (default: login)
        #[arg(short, long)]
        profile: Option<String>,
        /// Write the annotated frame to this file
        #[arg(long)]
        render: Option<PathBuf>,
        /// TrueType font for the overlay text
        #[arg(long, requires = "render")]
        font: Option<PathBuf>,
        /// Append the decision to a JSON-lines audit file
        #[arg(long)]
        audit_log: Option<PathBuf>,
    },
    /// Continuous verification: reduced decision summary
    Verify {
        #[command(flatten)]
        input: Input,
        #[arg(short, long, default_value = CONTINUOUS_PROFILE)]
        profile: String,
    },
    /// Run face localization only and print the primary face box
    Locate {
        #[command(flatten)]
        input: Input,
        /// Write the frame with the face outlined to this file
        #[arg(long)]
        render: Option<PathBuf>,
    },
    /// Validate the configuration and print labels and profiles
    CheckConfig,
}

#[derive(Serialize)]
struct AuditRecord<'a> {
    timestamp: String,
    image: String,
    profile: &'a str,
    #[serde(flatten)]
    decision: &'a AuthDecision,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Authorize {
            input,
            profile,
            render,
            font,
            audit_log,
        } => {
            let profile = profile.as_deref().unwrap_or(LOGIN_PROFILE);
            let engine = AuthorizationEngine::new(config.policy(Some(profile))?);
            let frame = read_frame(&input)?;
            let pipeline = build_pipeline(&config)?;
            let decision = pipeline.authorize(&frame, &engine)?;
            println!("{}", serde_json::to_string_pretty(&decision)?);

            if let Some(out) = render {
                let renderer = match font {
                    Some(path) => ResultRenderer::from_font_file(&path)?,
                    None => ResultRenderer::new(),
                };
                save_image(&renderer.render(&frame, &decision).to_rgb_image(), &out)?;
            }
            if let Some(log) = audit_log {
                append_audit(&log, &input.image, profile, &decision)?;
            }
        }
        Commands::Verify { input, profile } => {
            let engine = AuthorizationEngine::new(config.policy(Some(&profile))?);
            let frame = read_frame(&input)?;
            let pipeline = build_pipeline(&config)?;
            let decision = pipeline.authorize(&frame, &engine)?;
            println!("{}", serde_json::to_string_pretty(&decision.summary())?);
        }
        Commands::Locate { input, render } => {
            let frame = read_frame(&input)?;
            let localizer = build_localizer(&config)?;
            let face = localizer.find_face(&frame);
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "face_detected": face.is_some(),
                    "face_box": face,
                }))?
            );

            if let Some(out) = render {
                let image = match face {
                    Some(face) => ResultRenderer::new().outline(&frame, face).to_rgb_image(),
                    None => frame.to_rgb_image(),
                };
                save_image(&image, &out)?;
            }
        }
        Commands::CheckConfig => {
            config.validate().context("configuration is invalid")?;
            let labels: Vec<String> = config.label_set()?.iter().map(str::to_string).collect();
            let mut profiles = serde_json::Map::new();
            for name in config.profile_names() {
                let policy = config.policy(Some(name))?;
                profiles.insert(
                    name.to_string(),
                    serde_json::json!({
                        "threshold": policy.threshold(),
                        "min_confidence_gap": policy.min_confidence_gap(),
                    }),
                );
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "labels": labels,
                    "profiles": profiles,
                }))?
            );
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path).with_context(|| format!("loading config {}", path.display())),
        None => {
            tracing::debug!("no config file given, using defaults");
            Ok(Config::from_env())
        }
    }
}

fn read_frame(input: &Input) -> Result<RawFrame> {
    let bytes = if input.image.as_os_str() == "-" {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf).context("reading stdin")?;
        buf
    } else {
        std::fs::read(&input.image).with_context(|| format!("reading {}", input.image.display()))?
    };

    let frame = if input.data_url {
        let text = String::from_utf8(bytes).context("data URL payload is not UTF-8")?;
        decode_data_url(text.trim())
    } else {
        decode_image(&bytes)
    };
    frame.with_context(|| format!("decoding {}", input.image.display()))
}

fn build_localizer(config: &Config) -> Result<FaceLocalizer> {
    let path = config
        .detector
        .model_path
        .as_deref()
        .ok_or(ConfigError::MissingModel("face detector"))?;
    let detector = CascadeDetector::load(path)?;
    Ok(FaceLocalizer::new(Box::new(detector), config.detector.clone(), config.crop)?)
}

#[cfg(feature = "onnx")]
fn build_pipeline(config: &Config) -> Result<AuthPipeline> {
    AuthPipeline::load(config).context("building authorization pipeline")
}

#[cfg(not(feature = "onnx"))]
fn build_pipeline(_config: &Config) -> Result<AuthPipeline> {
    anyhow::bail!("facepass was built without the `onnx` feature; no embedding or classifier provider is available")
}

fn save_image(image: &image::RgbImage, path: &Path) -> Result<()> {
    image
        .save(path)
        .with_context(|| format!("writing {}", path.display()))?;
    tracing::info!(path = %path.display(), "rendered frame written");
    Ok(())
}

fn append_audit(log: &Path, image: &Path, profile: &str, decision: &AuthDecision) -> Result<()> {
    let record = AuditRecord {
        timestamp: chrono::Utc::now().to_rfc3339(),
        image: image.display().to_string(),
        profile,
        decision,
    };
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log)
        .with_context(|| format!("opening audit log {}", log.display()))?;
    writeln!(file, "{}", serde_json::to_string(&record)?)?;
    Ok(())
}
