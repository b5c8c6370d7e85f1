use clap::{Parser, Subcommand};
use cli::{AnnotatorConfig, parse_point};
use color_eyre::eyre::{Result, WrapErr};
use image::DynamicImage;
use mask::{PointPrompt, ReviewAction};
use sam2::SegmenterBackend;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a .toml or .json configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    InitConfig {
        /// Destination, format chosen by extension
        #[arg(short, long, default_value = "annotator.toml")]
        output: PathBuf,
    },
    /// Copy a source image into the data root
    RegisterImage {
        /// Name the image is registered under
        #[arg(short, long)]
        name: String,
        /// Image file to register
        file: PathBuf,
    },
    /// Predict a mask from point prompts
    Predict {
        #[arg(short, long)]
        image: String,
        /// Point as "x,y" or "x,y,neg" (repeatable)
        #[arg(short, long = "point", value_parser = parse_point, required = true)]
        points: Vec<PointPrompt>,
        /// Store the predicted mask under this query
        #[arg(long)]
        save_query: Option<i64>,
        /// Where to write the prediction overlay
        #[arg(short, long, default_value = "prediction.png")]
        output: PathBuf,
    },
    /// Store a mask file for an image and query
    SaveMask {
        #[arg(short, long)]
        image: String,
        #[arg(short, long)]
        query: i64,
        /// Mask PNG
        mask: PathBuf,
    },
    /// Remove a stored mask
    DeleteMask {
        #[arg(short, long)]
        image: String,
        #[arg(short, long)]
        query: i64,
        /// Mask id as printed by save-mask
        id: String,
    },
    /// Render thumbnails and the combined overlay for a collection
    ListMasks {
        #[arg(short, long)]
        image: String,
        #[arg(short, long)]
        query: i64,
        /// Directory receiving combined.png and <id>.png files
        #[arg(short, long, default_value = "previews")]
        output_dir: PathBuf,
    },
    /// Record a review action for an item of a chunk
    LogAction {
        #[arg(long)]
        chunk: i64,
        #[arg(long)]
        index: i64,
        #[arg(long)]
        image: String,
        #[arg(long)]
        query: i64,
        /// "done" or "skip"
        action: ReviewAction,
    },
    /// Print the latest action per item of a chunk
    Status {
        #[arg(long)]
        chunk: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AnnotatorConfig::from_file(path)
            .wrap_err_with(|| format!("loading config {}", path.display()))?,
        None => AnnotatorConfig::default(),
    };
    let coordinator = config.coordinator();

    match cli.command {
        Commands::InitConfig { output } => {
            match output.extension().and_then(|ext| ext.to_str()) {
                Some("json") => config.to_json_file(&output)?,
                _ => config.to_toml_file(&output)?,
            }
            info!("Wrote configuration to {}", output.display());
        }
        Commands::RegisterImage { name, file } => {
            let bytes = fs::read(&file).wrap_err_with(|| format!("reading {}", file.display()))?;
            let image = coordinator.register_image(&name, &bytes)?;
            println!("{}", serde_json::to_string_pretty(&image)?);
        }
        Commands::Predict { image, points, save_query, output } => {
            let segmenter = SegmenterBackend::from_config(&config.segmenter)?;
            let prediction = coordinator.predict(&segmenter, &image, &points).await?;
            fs::write(&output, &prediction.overlay_png)?;
            info!("Wrote prediction overlay to {}", output.display());

            if let Some(query_id) = save_query {
                let id = coordinator.save_mask(&image, query_id, &prediction.mask_png)?;
                println!("{}", id);
            }
        }
        Commands::SaveMask { image, query, mask } => {
            let bytes = fs::read(&mask).wrap_err_with(|| format!("reading {}", mask.display()))?;
            let id = coordinator.save_mask(&image, query, &bytes)?;
            println!("{}", id);
        }
        Commands::DeleteMask { image, query, id } => {
            coordinator.delete_mask(&image, query, &id)?;
            info!("Deleted mask {} from {}#{}", id, image, query);
        }
        Commands::ListMasks { image, query, output_dir } => {
            let listing = coordinator.list_masks(&image, query)?;
            write_listing(&output_dir, listing)?;
        }
        Commands::LogAction { chunk, index, image, query, action } => {
            let event = coordinator.log_action(chunk, index, &image, query, &action.to_string())?;
            println!("{}", serde_json::to_string(&event)?);
        }
        Commands::Status { chunk } => {
            let statuses = coordinator.status(chunk)?;
            println!("{}", serde_json::to_string_pretty(&statuses)?);
        }
    }

    Ok(())
}

fn write_listing(output_dir: &Path, listing: mask::MaskListing) -> Result<()> {
    let Some(combined) = listing.combined else {
        warn!("No masks to render");
        return Ok(());
    };
    fs::create_dir_all(output_dir)?;

    DynamicImage::ImageRgba8(combined).save(output_dir.join("combined.png"))?;
    for thumb in listing.masks {
        let path = output_dir.join(format!("{}.png", thumb.id));
        DynamicImage::ImageRgba8(thumb.image).save(&path)?;
        println!("{}\t#{:02x}{:02x}{:02x}", thumb.id, thumb.color[0], thumb.color[1], thumb.color[2]);
    }
    info!("Wrote previews to {}", output_dir.display());
    Ok(())
}
