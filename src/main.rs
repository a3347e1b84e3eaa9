//! gphoto-session command-line front end.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use gphoto_session::{
    Camera, CameraError, CameraIdentity, CaptureTarget, ConfigTree, GPhotoCamera, GPhotoDriver,
    SessionManager, DEFAULT_CHUNK_SIZE,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Control USB cameras through libgphoto2.
#[derive(Parser, Debug)]
#[command(name = "gphoto-session")]
#[command(version, about, long_about = None)]
struct Cli {
    /// USB bus of the camera (defaults to the first camera found)
    #[arg(long, global = true, requires = "device")]
    bus: Option<u32>,

    /// USB device number of the camera
    #[arg(long, global = true, requires = "bus")]
    device: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached cameras
    List,

    /// Capture an image and download it
    Capture {
        /// Where to write the image
        #[arg(short, long, default_value = "capture.jpg")]
        output: PathBuf,

        /// Store the image on the memory card and leave it there
        #[arg(long)]
        keep: bool,
    },

    /// Grab one live-view frame
    Preview {
        /// Where to write the frame
        #[arg(short, long, default_value = "preview.jpg")]
        output: PathBuf,
    },

    /// List every file stored on the camera
    Files,

    /// Show the camera's storage areas
    Storage,

    /// Download one file from the camera
    Download {
        /// Camera path, e.g. /store_00010001/DCIM/100CANON/IMG_0001.JPG
        path: String,

        /// Local destination (defaults to the file name)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Transfer chunk size in bytes
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },

    /// Show settings below a configuration path
    Config {
        /// Configuration path, e.g. /main/imgsettings
        #[arg(default_value = "/")]
        path: String,

        /// Show only read-only status values
        #[arg(long)]
        status: bool,
    },

    /// Change one setting
    Set {
        /// Configuration path, e.g. /main/imgsettings/iso
        path: String,

        /// New value
        value: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gphoto_session=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(&Cli::parse()) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> gphoto_session::Result<()> {
    let manager = SessionManager::new(GPhotoDriver::new()?);

    if matches!(cli.command, Command::List) {
        for camera in manager.list_cameras()? {
            println!("{}  {}", camera.identity, camera.model);
        }
        return Ok(());
    }

    let (identity, camera) = match (cli.bus, cli.device) {
        (Some(bus), Some(device)) => {
            let identity = CameraIdentity::new(bus, device);
            (identity, manager.open(identity)?)
        }
        _ => manager.open_first_available()?,
    };
    info!(identity = %identity, model = %camera.model_name()?, "using camera");

    let result = execute(&cli.command, &camera);
    camera.release()?;
    manager.close(identity)?;
    result
}

fn execute(command: &Command, camera: &Camera<GPhotoCamera>) -> gphoto_session::Result<()> {
    match command {
        Command::List => Ok(()),
        Command::Capture { output, keep } => {
            if *keep {
                let file = camera.capture_to(CaptureTarget::MemoryCard)?;
                let written = file.save(camera, output)?;
                println!("{} -> {} ({written} bytes)", file.path(), output.display());
            } else {
                let data = camera.capture_to_memory()?;
                std::fs::write(output, &data)?;
                println!("{} ({} bytes)", output.display(), data.len());
            }
            Ok(())
        }
        Command::Preview { output } => {
            let frame = camera.preview()?;
            std::fs::write(output, &frame)?;
            println!("{} ({} bytes)", output.display(), frame.len());
            Ok(())
        }
        Command::Files => {
            for file in camera.list_files() {
                let file = file?;
                let info = file.info(camera)?;
                let size = info.size.map_or_else(|| "?".to_owned(), |size| size.to_string());
                println!("{}  {size:>10}  {}", info.permissions, file.path());
            }
            Ok(())
        }
        Command::Storage => {
            for storage in camera.storage_info()? {
                println!(
                    "{}  {}",
                    storage.base_directory.as_deref().unwrap_or("?"),
                    storage.label.as_deref().unwrap_or_default()
                );
                if let Some(description) = &storage.description {
                    println!("    description: {description}");
                }
                if let Some(kind) = storage.storage_type {
                    println!("    type: {kind}");
                }
                if let Some(access) = storage.access {
                    println!("    access: {access}");
                }
                if let (Some(free), Some(capacity)) = (storage.free_kb, storage.capacity_kb) {
                    println!("    free: {free} of {capacity} KiB");
                }
                if let Some(images) = storage.free_images {
                    println!("    remaining images: {images}");
                }
            }
            Ok(())
        }
        Command::Download {
            path,
            output,
            chunk_size,
        } => {
            let path = path.trim_end_matches('/');
            for file in camera.list_files() {
                let file = file?;
                if file.path().to_string() == path {
                    let target = output
                        .clone()
                        .unwrap_or_else(|| PathBuf::from(file.name()));
                    let written = file.save_with(camera, &target, *chunk_size)?;
                    println!("{path} -> {} ({written} bytes)", target.display());
                    return Ok(());
                }
            }
            Err(CameraError::Native(format!("no file {path} on the camera")))
        }
        Command::Config { path, status } => {
            let mut tree = ConfigTree::new();
            let node = tree.lookup(camera, path)?;
            let leaves = if *status {
                node.status(camera)?
            } else {
                node.leaves(camera)?
            };
            for leaf in leaves {
                let value = leaf.get().map(|v| v.to_string()).unwrap_or_default();
                let access = if leaf.is_readonly() { ", read-only" } else { "" };
                println!("{} ({}{access}) = {value}", leaf.location(), leaf.kind());
                if let Some(choices) = leaf.choices() {
                    println!("    choices: {}", choices.join(" | "));
                }
                if let Some(bounds) = leaf.bounds() {
                    println!("    range: {}..={} step {}", bounds.min, bounds.max, bounds.step);
                }
            }
            Ok(())
        }
        Command::Set { path, value } => {
            let mut tree = ConfigTree::new();
            let node = tree.lookup(camera, path)?;
            let value = node.parse_value(value)?;
            node.set(camera, value)?;
            println!(
                "{} = {}",
                node.location(),
                node.get().map(|v| v.to_string()).unwrap_or_default()
            );
            Ok(())
        }
    }
}
