use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use faceid_core::bus::{BUS_NAME, INTERFACE, OBJECT_PATH};
use faceid_core::verify::VerifyError;
use faceid_core::{Config, FrameRing, Gallery, ModelHandle, ProtectedRegistry, Verifier};
use faceid_hw::{Camera, CaptureLoop, Frame};
use image::RgbImage;
use nix::sys::termios::{self, LocalFlags, SetArg};
use std::io::{BufRead, Write};
use std::sync::mpsc;
use std::time::{Duration, Instant};

mod credentials;

#[derive(Parser)]
#[command(name = "faceid", about = "faceid face verification CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the local account
    Signup {
        #[arg(short, long)]
        username: String,
    },
    /// Log in to the local account
    Login {
        #[arg(short, long)]
        username: String,
    },
    /// Capture new ID images, replacing the current ones
    Enroll {
        /// How long to capture for
        #[arg(short, long, default_value_t = 5)]
        seconds: u64,
        /// Overwrite existing ID images without asking
        #[arg(short, long)]
        yes: bool,
    },
    /// Verify your face against the enrolled ID images
    Verify,
    /// Protect an application behind face verification
    Protect {
        /// Executable name (e.g., "firefox")
        name: String,
    },
    /// Stop protecting an application
    Unprotect { name: String },
    /// List protected applications
    List,
    /// Show guard daemon status
    Status,
    /// Withdraw approvals held by the running daemon
    Revoke {
        /// Application to revoke; all when omitted
        name: Option<String>,
    },
    /// List capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;

    match cli.command {
        Commands::Signup { username } => {
            let password = read_password("Password: ")?;
            match credentials::sign_up(&config.credentials_path(), &username, &password) {
                Ok(()) => println!("Account created. Run `faceid login` next."),
                Err(e) => println!("Account creation failed: {e}"),
            }
        }
        Commands::Login { username } => {
            let password = read_password("Password: ")?;
            match credentials::login(&config.credentials_path(), &username, &password) {
                Ok(()) => {
                    let gallery = Gallery::open(config.gallery_dir())?;
                    if gallery.is_empty()? {
                        println!("Logged in. ID images are required: run `faceid enroll`.");
                    } else {
                        println!("Logged in.");
                    }
                }
                Err(e) => println!("Login failed: {e}"),
            }
        }
        Commands::Enroll { seconds, yes } => enroll(&config, seconds, yes)?,
        Commands::Verify => verify(&config)?,
        Commands::Protect { name } => {
            let registry = ProtectedRegistry::load(config.registry_path())?;
            if registry.add(&name)? {
                println!("Protected: {name}");
            } else {
                println!("{name} is already protected");
            }
        }
        Commands::Unprotect { name } => {
            let registry = ProtectedRegistry::load(config.registry_path())?;
            if registry.remove(&name)? {
                println!("No longer protected: {name}");
            } else {
                println!("{name} was not protected");
            }
        }
        Commands::List => {
            let registry = ProtectedRegistry::load(config.registry_path())?;
            let names = registry.names()?;
            if names.is_empty() {
                println!("No protected applications");
            }
            for name in names {
                println!("{name}");
            }
        }
        Commands::Status => {
            let reply = call_daemon("Status", &()).await?;
            let json: String = reply.body().deserialize()?;
            let value: serde_json::Value = serde_json::from_str(&json)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Revoke { name } => match name {
            Some(name) => {
                let reply = call_daemon("Revoke", &(name.as_str(),)).await?;
                let revoked: bool = reply.body().deserialize()?;
                if revoked {
                    println!("Revoked approval for {name}");
                } else {
                    println!("{name} is not protected");
                }
            }
            None => {
                call_daemon("RevokeAll", &()).await?;
                println!("Revoked all approvals");
            }
        },
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
    }

    Ok(())
}

/// Stream frames into the ring buffer for `seconds`, then replace the gallery.
fn enroll(config: &Config, seconds: u64, yes: bool) -> Result<()> {
    let gallery = Gallery::open(config.gallery_dir())?;
    let stdin = std::io::stdin();
    update_gallery(&gallery, yes, &mut stdin.lock(), &mut std::io::stdout(), || {
        capture_id_images(config, seconds)
    })?;
    Ok(())
}

/// Confirm before overwriting existing ID images, then capture and commit.
///
/// Returns whether the gallery was replaced. A declined prompt returns
/// before `capture` runs, leaving the gallery untouched.
fn update_gallery<R, W, F>(
    gallery: &Gallery,
    yes: bool,
    input: &mut R,
    out: &mut W,
    capture: F,
) -> Result<bool>
where
    R: BufRead,
    W: Write,
    F: FnOnce() -> Result<Vec<RgbImage>>,
{
    if !gallery.is_empty()? && !yes {
        let answer = ask(
            input,
            out,
            "This will overwrite your current ID images. Are you sure you want to proceed? [y/N] ",
        )?;
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            writeln!(out, "ID images unchanged.")?;
            return Ok(false);
        }
    }

    let images = capture()?;
    if images.is_empty() {
        bail!("no frames captured; check the camera and crop settings");
    }

    gallery.replace(&images)?;
    writeln!(out, "Successfully updated ID images! ({} saved)", images.len())?;
    Ok(true)
}

fn capture_id_images(config: &Config, seconds: u64) -> Result<Vec<RgbImage>> {
    let camera = open_camera(config)?;
    let crop = config.crop;
    let (tx, rx) = mpsc::sync_channel::<Frame>(4);
    let capture = CaptureLoop::spawn(camera, move |frame| {
        tx.send(frame.crop(crop.x, crop.y, crop.width, crop.height)).is_ok()
    })?;

    println!("Center your face in the camera. Capturing pictures...");
    let mut ring = FrameRing::new(config.gallery_capacity);
    let deadline = Instant::now() + Duration::from_secs(seconds);
    let mut last_shown = u64::MAX;

    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        let secs = remaining.as_secs();
        if secs != last_shown {
            println!("Seconds left: {}", secs + 1);
            last_shown = secs;
        }
        match rx.recv_timeout(remaining.min(Duration::from_millis(200))) {
            Ok(frame) => ring.push(frame),
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    drop(rx);
    if let Err(e) = capture.stop() {
        tracing::warn!(error = %e, "capture ended with an error");
    }

    tracing::info!(captured = ring.total_pushed(), kept = ring.len(), "capture finished");
    Ok(ring.snapshot().iter().filter_map(Frame::to_rgb_image).collect())
}

/// Capture one frame and verify it locally.
fn verify(config: &Config) -> Result<()> {
    let camera = open_camera(config)?;
    let (frames, _) = camera.capture_frames(1)?;
    let crop = config.crop;
    let Some(probe) = frames
        .first()
        .map(|f| f.crop(crop.x, crop.y, crop.width, crop.height))
        .and_then(|f| f.to_rgb_image())
    else {
        println!("No usable frame captured, please try again");
        return Ok(());
    };

    let gallery = Gallery::open(config.gallery_dir())?;
    let verifier = Verifier::new(
        ModelHandle::new(config.model_path()),
        config.thresholds,
        config.probe_path(),
    );

    match verifier.verify(&probe, &gallery) {
        Ok(result) => {
            println!("{}", result.outcome.message());
            println!(
                "  {}/{} ID images matched (ratio {:.2})",
                result.match_count, result.gallery_size, result.match_ratio
            );
        }
        Err(VerifyError::NoGalleryImages) => {
            println!("No ID images found. Run `faceid enroll` first.");
        }
        Err(e) => println!("Verification failed: {e}. Please try again."),
    }
    Ok(())
}

fn open_camera(config: &Config) -> Result<Camera> {
    let mut camera = Camera::open(&config.camera_device)
        .with_context(|| format!("opening camera {}", config.camera_device))?;
    camera.set_warmup(config.warmup_frames);
    Ok(camera)
}

fn ask<R: BufRead, W: Write>(input: &mut R, out: &mut W, message: &str) -> Result<String> {
    write!(out, "{message}")?;
    out.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Prompt on the terminal with echo off. Falls back to a plain read when
/// stdin is not a terminal.
fn read_password(message: &str) -> Result<String> {
    let stdin = std::io::stdin();
    let saved = termios::tcgetattr(&stdin).ok();
    if let Some(original) = &saved {
        let mut silent = original.clone();
        silent.local_flags.remove(LocalFlags::ECHO);
        silent.local_flags.insert(LocalFlags::ECHONL);
        termios::tcsetattr(&stdin, SetArg::TCSANOW, &silent).context("disabling echo")?;
    }

    let password = ask(&mut stdin.lock(), &mut std::io::stdout(), message);

    if let Some(original) = &saved {
        termios::tcsetattr(&stdin, SetArg::TCSANOW, original).context("restoring echo")?;
    }
    password
}

async fn call_daemon<B>(method: &str, body: &B) -> Result<zbus::Message>
where
    B: serde::Serialize + zbus::zvariant::DynamicType,
{
    let conn = zbus::Connection::session()
        .await
        .context("connecting to the session bus")?;
    conn.call_method(Some(BUS_NAME), OBJECT_PATH, Some(INTERFACE), method, body)
        .await
        .with_context(|| format!("calling {method} on faceidd (is it running?)"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn gallery_with(n: usize) -> (tempfile::TempDir, Gallery) {
        let root = tempfile::tempdir().unwrap();
        let gallery = Gallery::open(root.path().join("verification_images")).unwrap();
        let images: Vec<_> = (0..n).map(|_| RgbImage::new(8, 8)).collect();
        gallery.replace(&images).unwrap();
        (root, gallery)
    }

    fn contents(gallery: &Gallery) -> Vec<(std::path::PathBuf, Vec<u8>)> {
        gallery
            .images()
            .unwrap()
            .into_iter()
            .map(|p| {
                let bytes = std::fs::read(&p).unwrap();
                (p, bytes)
            })
            .collect()
    }

    #[test]
    fn test_declined_overwrite_leaves_gallery_unchanged() {
        let (_root, gallery) = gallery_with(3);
        let before = contents(&gallery);
        let mut out = Vec::new();
        let mut captured = false;

        let replaced = update_gallery(&gallery, false, &mut Cursor::new("n\n"), &mut out, || {
            captured = true;
            Ok(vec![RgbImage::new(8, 8)])
        })
        .unwrap();

        assert!(!replaced);
        assert!(!captured);
        assert_eq!(contents(&gallery), before);
        assert!(String::from_utf8(out).unwrap().contains("ID images unchanged."));
    }

    #[test]
    fn test_no_answer_counts_as_decline() {
        let (_root, gallery) = gallery_with(2);
        let replaced = update_gallery(&gallery, false, &mut Cursor::new(""), &mut Vec::new(), || {
            Ok(vec![RgbImage::new(8, 8)])
        })
        .unwrap();
        assert!(!replaced);
        assert_eq!(gallery.len().unwrap(), 2);
    }

    #[test]
    fn test_confirmed_overwrite_replaces() {
        let (_root, gallery) = gallery_with(3);
        let replaced = update_gallery(&gallery, false, &mut Cursor::new("y\n"), &mut Vec::new(), || {
            Ok(vec![RgbImage::new(8, 8)])
        })
        .unwrap();
        assert!(replaced);
        assert_eq!(gallery.len().unwrap(), 1);
    }

    #[test]
    fn test_empty_gallery_skips_prompt() {
        let (_root, gallery) = gallery_with(0);
        let mut out = Vec::new();
        let replaced = update_gallery(&gallery, false, &mut Cursor::new(""), &mut out, || {
            Ok(vec![RgbImage::new(8, 8), RgbImage::new(8, 8)])
        })
        .unwrap();
        assert!(replaced);
        assert_eq!(gallery.len().unwrap(), 2);
        assert!(!String::from_utf8(out).unwrap().contains("Are you sure"));
    }

    #[test]
    fn test_empty_capture_keeps_gallery() {
        let (_root, gallery) = gallery_with(2);
        let result = update_gallery(&gallery, true, &mut Cursor::new(""), &mut Vec::new(), || {
            Ok(Vec::new())
        });
        assert!(result.is_err());
        assert_eq!(gallery.len().unwrap(), 2);
    }
}
