//! CLI for GenStudio - multi-provider AI image generation.

use anyhow::Context;
use base64::Engine;
use clap::{Args, Parser, Subcommand, ValueEnum};
use genstudio::{
    create_generation_service, AspectRatio, DataUri, GalleryImage, GalleryStore,
    ImageGenerationService, ModelTier, OutputFormat, PresetStore, PresetUpdate,
    ProviderConfigUpdate, ProviderKind, Resolution, SettingsStore, SortField, SortOrder,
    TaskController, TaskStatus,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "genstudio")]
#[command(about = "Generate images via fal.ai or Gemini, with a local gallery and prompt presets")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging (-v: genstudio debug, -vv: everything)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate images from a prompt, optionally guided by reference images
    Generate(GenerateArgs),

    /// List providers and whether a key is configured
    Providers,

    /// Show or change provider settings
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Browse and curate generated images
    #[command(subcommand)]
    Gallery(GalleryCommand),

    /// Manage prompt presets
    #[command(subcommand)]
    Presets(PresetCommand),
}

#[derive(Args)]
struct GenerateArgs {
    /// The text prompt describing the image (optional with --preset)
    prompt: Option<String>,

    /// Provider to use (defaults to the active provider)
    #[arg(short, long)]
    provider: Option<ProviderKind>,

    /// Model tier
    #[arg(short, long, value_enum)]
    model: Option<ModelArg>,

    /// Number of images (clamped to 1-4)
    #[arg(short, long, default_value_t = 1, allow_negative_numbers = true)]
    num_images: i32,

    /// Aspect ratio
    #[arg(long, value_enum)]
    aspect_ratio: Option<AspectRatioArg>,

    /// Output resolution
    #[arg(long, value_enum)]
    resolution: Option<ResolutionArg>,

    /// Output format
    #[arg(long, value_enum)]
    format: Option<FormatArg>,

    /// Seed for deterministic generation
    #[arg(long)]
    seed: Option<i64>,

    /// What the image should avoid
    #[arg(long)]
    negative: Option<String>,

    /// Reference image: local file or URL (repeatable, at most 14)
    #[arg(short, long = "reference")]
    references: Vec<String>,

    /// Start from a saved preset (id or name)
    #[arg(long)]
    preset: Option<String>,

    /// Directory for saved images (defaults to the data directory)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Do not record the images in the gallery
    #[arg(long)]
    no_gallery: bool,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Show every provider's settings (keys are masked)
    Show,
    /// Store an API key
    SetKey {
        /// Provider
        provider: ProviderKind,
        /// API key
        key: String,
    },
    /// Make a provider the active one
    Use {
        /// Provider
        provider: ProviderKind,
    },
    /// Override a provider's endpoint (omit the URL to restore the default)
    SetBaseUrl {
        /// Provider
        provider: ProviderKind,
        /// Base URL
        url: Option<String>,
    },
    /// Route a provider through an HTTP(S) proxy (omit to clear)
    SetProxy {
        /// Provider
        provider: ProviderKind,
        /// Proxy URL
        proxy: Option<String>,
    },
    /// Check that a provider accepts the configured key
    Test {
        /// Provider (defaults to the active provider)
        provider: Option<ProviderKind>,
    },
}

#[derive(Subcommand)]
enum GalleryCommand {
    /// List images
    List {
        /// Only images with this tag
        #[arg(long)]
        tag: Option<String>,
        /// Case-insensitive search over tags and paths
        #[arg(long)]
        search: Option<String>,
        /// Sort field
        #[arg(long, value_enum, default_value = "date")]
        sort: SortArg,
        /// Ascending order (default is descending)
        #[arg(long)]
        asc: bool,
    },
    /// Add a tag to an image
    Tag {
        /// Image id
        id: String,
        /// Tag
        tag: String,
    },
    /// Remove a tag from an image
    Untag {
        /// Image id
        id: String,
        /// Tag
        tag: String,
    },
    /// List every tag in use
    Tags,
    /// Remove images
    Remove {
        /// Image ids
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[derive(Subcommand)]
enum PresetCommand {
    /// List presets
    List,
    /// Add a preset
    Add {
        /// Display name
        name: String,
        /// Prompt text
        prompt: String,
        /// Negative prompt
        #[arg(long)]
        negative: Option<String>,
    },
    /// Update a preset
    Update {
        /// Preset id or name
        preset: String,
        /// New name
        #[arg(long)]
        name: Option<String>,
        /// New prompt
        #[arg(long)]
        prompt: Option<String>,
        /// New negative prompt (empty clears it)
        #[arg(long)]
        negative: Option<String>,
    },
    /// Delete a preset
    Delete {
        /// Preset id or name
        preset: String,
    },
    /// Restore the built-in presets, discarding custom ones
    Reset,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModelArg {
    Base,
    Pro,
}

impl From<ModelArg> for ModelTier {
    fn from(arg: ModelArg) -> Self {
        match arg {
            ModelArg::Base => ModelTier::Base,
            ModelArg::Pro => ModelTier::Pro,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum AspectRatioArg {
    #[value(name = "1:1")]
    Square,
    #[value(name = "2:3")]
    TwoThree,
    #[value(name = "3:2")]
    ThreeTwo,
    #[value(name = "3:4")]
    ThreeFour,
    #[value(name = "4:3")]
    FourThree,
    #[value(name = "4:5")]
    FourFive,
    #[value(name = "5:4")]
    FiveFour,
    #[value(name = "9:16")]
    NineSixteen,
    #[value(name = "16:9")]
    SixteenNine,
    #[value(name = "21:9")]
    Ultrawide,
    #[value(name = "auto")]
    Auto,
}

impl From<AspectRatioArg> for AspectRatio {
    fn from(arg: AspectRatioArg) -> Self {
        match arg {
            AspectRatioArg::Square => AspectRatio::Square,
            AspectRatioArg::TwoThree => AspectRatio::TwoThree,
            AspectRatioArg::ThreeTwo => AspectRatio::ThreeTwo,
            AspectRatioArg::ThreeFour => AspectRatio::StandardPortrait,
            AspectRatioArg::FourThree => AspectRatio::Standard,
            AspectRatioArg::FourFive => AspectRatio::FourFive,
            AspectRatioArg::FiveFour => AspectRatio::FiveFour,
            AspectRatioArg::NineSixteen => AspectRatio::Portrait,
            AspectRatioArg::SixteenNine => AspectRatio::Landscape,
            AspectRatioArg::Ultrawide => AspectRatio::Ultrawide,
            AspectRatioArg::Auto => AspectRatio::Auto,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ResolutionArg {
    #[value(name = "1K", alias = "1k")]
    OneK,
    #[value(name = "2K", alias = "2k")]
    TwoK,
    #[value(name = "4K", alias = "4k")]
    FourK,
}

impl From<ResolutionArg> for Resolution {
    fn from(arg: ResolutionArg) -> Self {
        match arg {
            ResolutionArg::OneK => Resolution::OneK,
            ResolutionArg::TwoK => Resolution::TwoK,
            ResolutionArg::FourK => Resolution::FourK,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Png,
    #[value(alias = "jpg")]
    Jpeg,
    Webp,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Png => OutputFormat::Png,
            FormatArg::Jpeg => OutputFormat::Jpeg,
            FormatArg::Webp => OutputFormat::WebP,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SortArg {
    Date,
    Name,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Generate(args) => generate(args, cli.json).await?,
        Commands::Providers => list_providers(cli.json)?,
        Commands::Config(command) => config(command, cli.json).await?,
        Commands::Gallery(command) => gallery(command, cli.json)?,
        Commands::Presets(command) => presets(command, cli.json)?,
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "genstudio=debug",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Turns a local file into a data URI; URLs and data URIs pass through.
fn load_reference(reference: &str) -> anyhow::Result<String> {
    if reference.starts_with("http://")
        || reference.starts_with("https://")
        || DataUri::parse(reference).is_some()
    {
        return Ok(reference.to_string());
    }

    let path = Path::new(reference);
    let bytes =
        std::fs::read(path).with_context(|| format!("reading reference image {reference}"))?;
    let mime = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(OutputFormat::from_extension)
        .map_or("image/png", |format| format.mime_type());
    let data = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(DataUri::encode(mime, &data))
}

async fn generate(args: GenerateArgs, json_output: bool) -> anyhow::Result<()> {
    let settings = SettingsStore::open_default()?;
    let kind = args.provider.unwrap_or_else(|| settings.active_provider());
    let config = settings.resolved_config(kind);
    let service = create_generation_service(kind, &config)?;

    let output_dir = match args.output_dir {
        Some(dir) => dir,
        None => genstudio::paths::images_dir()?,
    };
    let mut controller = TaskController::new().with_save_dir(output_dir);

    if let Some(key) = &args.preset {
        let presets = PresetStore::open_default()?;
        let preset = presets
            .find(key)
            .with_context(|| format!("no preset named {key}"))?;
        controller.apply_preset(&preset);
    }
    if let Some(prompt) = args.prompt {
        controller.set_prompt(prompt);
    }
    if let Some(negative) = args.negative {
        controller.set_negative_prompt(negative);
    }
    if let Some(model) = args.model {
        controller.set_model(model.into());
    }
    if let Some(ratio) = args.aspect_ratio {
        controller.set_aspect_ratio(ratio.into());
    }
    if let Some(resolution) = args.resolution {
        controller.set_resolution(resolution.into());
    }
    if let Some(format) = args.format {
        controller.set_output_format(format.into());
    }
    controller.set_num_images(args.num_images);
    controller.set_seed(args.seed);
    for reference in &args.references {
        if !controller.add_reference_image(load_reference(reference)?) {
            tracing::warn!(reference = %reference, "reference image limit reached, ignoring");
        }
    }

    if !controller.can_generate() {
        anyhow::bail!("a prompt is required (pass one or use --preset)");
    }

    let gallery = if args.no_gallery {
        None
    } else {
        Some(GalleryStore::open_default()?)
    };

    if !json_output {
        eprintln!("Generating with {}...", service.name());
    }
    let task = controller.run(service.as_ref(), gallery.as_ref()).await?;

    if let Some(cost) = task.result().and_then(|result| result.cost()) {
        settings.add_spent(cost)?;
    }

    if json_output {
        print_json(task)?;
    } else if let Some(result) = task.result() {
        if result.success() {
            for image in result.images() {
                let location = image
                    .local_path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| image.source_url().to_string());
                println!("Generated image: {} ({})", location, image.content_type());
            }
            if let Some(description) = result.description() {
                println!("{description}");
            }
        }
    }

    if task.status() == TaskStatus::Failed {
        let message = task
            .result()
            .and_then(|result| result.error())
            .unwrap_or("generation failed");
        anyhow::bail!("{message}");
    }

    Ok(())
}

fn list_providers(json_output: bool) -> anyhow::Result<()> {
    #[derive(serde::Serialize)]
    struct ProviderInfo {
        kind: ProviderKind,
        active: bool,
        has_api_key: bool,
        env_var: Option<&'static str>,
        enabled: bool,
    }

    let settings = SettingsStore::open_default()?;
    let active = settings.active_provider();
    let providers: Vec<ProviderInfo> = ProviderKind::ALL
        .into_iter()
        .map(|kind| ProviderInfo {
            kind,
            active: kind == active,
            has_api_key: settings.resolved_config(kind).has_api_key(),
            env_var: kind.api_key_env_var(),
            enabled: match kind {
                ProviderKind::Fal | ProviderKind::Custom => cfg!(feature = "fal-image"),
                ProviderKind::Google => cfg!(feature = "gemini-image"),
            },
        })
        .collect();

    if json_output {
        print_json(&providers)?;
    } else {
        println!("Available providers:\n");
        for p in &providers {
            let status = if p.enabled { "✓" } else { "✗" };
            let marker = if p.active { " (active)" } else { "" };
            println!("  {} {}{}", status, p.kind, marker);
            let key = if p.has_api_key { "configured" } else { "missing" };
            match p.env_var {
                Some(var) => println!("    API key: {key} (env: {var})"),
                None => println!("    API key: {key}"),
            }
        }
    }

    Ok(())
}

async fn config(command: ConfigCommand, json_output: bool) -> anyhow::Result<()> {
    let settings = SettingsStore::open_default()?;

    match command {
        ConfigCommand::Show => {
            let active = settings.active_provider();
            let configs: Vec<_> = ProviderKind::ALL
                .into_iter()
                .map(|kind| {
                    let config = settings.config(kind);
                    serde_json::json!({
                        "provider": kind,
                        "active": kind == active,
                        "apiKey": mask_key(&config.api_key),
                        "baseUrl": config.base_url,
                        "proxy": config.proxy,
                        "timeout": config.timeout_ms,
                    })
                })
                .collect();
            if json_output {
                print_json(&serde_json::json!({
                    "activeProvider": active,
                    "connected": settings.is_connected(),
                    "totalSpent": settings.total_spent(),
                    "configs": configs,
                }))?;
            } else {
                println!("Settings: {}", settings.path().display());
                println!(
                    "Active provider: {} ({})",
                    active,
                    if settings.is_connected() { "connected" } else { "not verified" }
                );
                for config in &configs {
                    println!("\n{}", serde_json::to_string_pretty(config)?);
                }
            }
        }
        ConfigCommand::SetKey { provider, key } => {
            settings.set_api_key(provider, key.trim())?;
            println!("Stored API key for {provider}");
        }
        ConfigCommand::Use { provider } => {
            settings.set_active_provider(provider)?;
            settings.set_connected(false)?;
            println!("Active provider: {provider}");
        }
        ConfigCommand::SetBaseUrl { provider, url } => {
            let url = url
                .filter(|u| !u.trim().is_empty())
                .or_else(|| provider.default_base_url().map(str::to_string));
            settings.update_config(
                provider,
                ProviderConfigUpdate {
                    base_url: Some(url.clone()),
                    ..Default::default()
                },
            )?;
            println!("Base URL for {provider}: {}", url.as_deref().unwrap_or("(none)"));
        }
        ConfigCommand::SetProxy { provider, proxy } => {
            settings.set_proxy(provider, proxy.unwrap_or_default())?;
            let proxy = settings.config(provider).proxy;
            println!("Proxy for {provider}: {}", proxy.as_deref().unwrap_or("(none)"));
        }
        ConfigCommand::Test { provider } => {
            let kind = provider.unwrap_or_else(|| settings.active_provider());
            let service = create_generation_service(kind, &settings.resolved_config(kind))?;
            let outcome = service.test_connection().await;
            if kind == settings.active_provider() {
                settings.set_connected(outcome.is_ok())?;
            }
            match outcome {
                Ok(_) if json_output => {
                    print_json(&serde_json::json!({"provider": kind, "ok": true}))?
                }
                Ok(_) => println!("{} accepted the API key", service.name()),
                Err(err) => anyhow::bail!("{}: {err}", service.name()),
            }
        }
    }

    Ok(())
}

fn mask_key(key: &str) -> String {
    let key = key.trim();
    if key.is_empty() {
        return String::new();
    }
    let tail: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("***{tail}")
}

fn gallery(command: GalleryCommand, json_output: bool) -> anyhow::Result<()> {
    let store = GalleryStore::open_default()?;

    match command {
        GalleryCommand::List {
            tag,
            search,
            sort,
            asc,
        } => {
            store.set_filter_tag(tag);
            store.set_search_query(search.unwrap_or_default());
            let field = match sort {
                SortArg::Date => SortField::Date,
                SortArg::Name => SortField::Name,
            };
            let order = if asc { SortOrder::Asc } else { SortOrder::Desc };
            store.set_sort(field, order);

            let images = store.filtered();
            if json_output {
                print_json(&images)?;
            } else if images.is_empty() {
                println!("No images");
            } else {
                for image in &images {
                    print_gallery_image(image);
                }
            }
        }
        GalleryCommand::Tag { id, tag } => {
            if !store.add_tag(&id, &tag)? {
                anyhow::bail!("image {id} not found or already tagged {tag}");
            }
        }
        GalleryCommand::Untag { id, tag } => {
            if !store.remove_tag(&id, &tag)? {
                anyhow::bail!("image {id} not found or not tagged {tag}");
            }
        }
        GalleryCommand::Tags => {
            let tags = store.all_tags();
            if json_output {
                print_json(&tags)?;
            } else {
                for tag in tags {
                    println!("{tag}");
                }
            }
        }
        GalleryCommand::Remove { ids } => {
            let removed = store.remove(ids.as_slice())?;
            println!("Removed {removed} image(s)");
        }
    }

    Ok(())
}

fn print_gallery_image(image: &GalleryImage) {
    let location = if DataUri::parse(&image.file_path).is_some() {
        "(embedded image)"
    } else {
        image.file_path.as_str()
    };
    println!(
        "{}  {}  {}",
        image.id,
        image.created_at.format("%Y-%m-%d %H:%M"),
        location
    );
    if !image.tags.is_empty() {
        println!("    tags: {}", image.tags.join(", "));
    }
}

fn presets(command: PresetCommand, json_output: bool) -> anyhow::Result<()> {
    let store = PresetStore::open_default()?;

    match command {
        PresetCommand::List => {
            let presets = store.presets();
            if json_output {
                print_json(&presets)?;
            } else {
                for preset in &presets {
                    println!("{}  {}", preset.id, preset.name);
                    println!("    {}", preset.prompt);
                    if let Some(negative) = &preset.negative_prompt {
                        println!("    avoid: {negative}");
                    }
                }
            }
        }
        PresetCommand::Add {
            name,
            prompt,
            negative,
        } => {
            let preset = store.add(name, prompt, negative)?;
            if json_output {
                print_json(&preset)?;
            } else {
                println!("Added preset {}", preset.id);
            }
        }
        PresetCommand::Update {
            preset,
            name,
            prompt,
            negative,
        } => {
            let id = store
                .find(&preset)
                .with_context(|| format!("no preset named {preset}"))?
                .id;
            let update = PresetUpdate {
                name,
                prompt,
                negative_prompt: negative.map(|n| Some(n).filter(|n| !n.trim().is_empty())),
            };
            if let Some(updated) = store.update(&id, update)? {
                if json_output {
                    print_json(&updated)?;
                } else {
                    println!("Updated preset {}", updated.id);
                }
            }
        }
        PresetCommand::Delete { preset } => {
            let id = store
                .find(&preset)
                .with_context(|| format!("no preset named {preset}"))?
                .id;
            store.delete(&id)?;
            println!("Deleted preset {id}");
        }
        PresetCommand::Reset => {
            store.reset_to_default()?;
            println!("Restored {} built-in presets", store.presets().len());
        }
    }

    Ok(())
}
