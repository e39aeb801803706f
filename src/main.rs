use clap::{Parser, Subcommand};
use sitegraph::cache::CacheError;
use sitegraph::config::{self, SiteConfig};
use sitegraph::graph::{ContentGraph, GraphBuilder};
use sitegraph::imaging::{FillMode, ImageTransformer, RustBackend, native_mime_type};
use sitegraph::output::{self, CacheSummary};
use sitegraph::path::ContentPath;
use sitegraph::render::Renderer;
use sitegraph::schema::TypeRegistry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn version_string() -> &'static str {
    let hash = env!("SITEGRAPH_GIT_HASH");
    if hash.is_empty() {
        env!("CARGO_PKG_VERSION")
    } else {
        // Leaked once at startup
        Box::leak(format!("{}@{hash}", env!("CARGO_PKG_VERSION")).into_boxed_str())
    }
}

#[derive(Parser)]
#[command(name = "sitegraph")]
#[command(about = "Load, validate and inspect a cross-referenced content tree")]
#[command(long_about = "\
Load, validate and inspect a cross-referenced content tree

Every directory holding an _index.toml is a node; <name>.toml files are
single-file nodes. Numeric prefixes order siblings and are dropped from paths.

Content structure:

  content/
  ├── _index.toml                  # Root node (type = \"website\")
  ├── config.toml                  # Site config (optional)
  ├── 010-blog/                    # Section → /blog
  │   ├── _index.toml
  │   ├── 010-first.toml           # Article → /blog/first
  │   └── 020-second.toml          # related = [\"../first\"]
  └── 020-gallery/
      └── sunset/                  # Image page → /gallery/sunset
          ├── _index.toml          # image = \"hero.jpg\"
          ├── caption.md           # Markdown field from a property file
          └── hero.jpg

References are content paths relative to the node holding them; every
reference, file and markdown link is checked before the graph is usable.

Run 'sitegraph gen-config' to generate a documented config.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Content directory
    #[arg(long, default_value = "content", global = true)]
    source: PathBuf,

    /// Output directory for rendered artifacts
    #[arg(long, default_value = "dist", global = true)]
    output: PathBuf,

    /// Log debug output to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load and validate the content tree, then print it
    Check,
    /// Resize an image field and print the resulting hrefs
    Image {
        /// Content path of the node, e.g. /gallery/sunset
        node: String,
        /// Image field name
        field: String,
        #[arg(long)]
        width: u32,
        #[arg(long)]
        height: u32,
        /// cover, fit, transform or no-resize
        #[arg(long, default_value = "cover")]
        fill: FillMode,
    },
    /// Print derived-asset cache statistics
    Cache {
        /// Remove all cached entries and artifacts
        #[arg(long)]
        clear: bool,
    },
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() {
    let cli = Cli::parse();

    // --verbose enables DEBUG, otherwise use RUST_LOG or default to WARN
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(cli) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Check => {
            let config = config::load_config(&cli.source)?;
            init_thread_pool(&config.processing);
            let registry = TypeRegistry::standard();
            println!("==> Checking {}", cli.source.display());
            let graph = builder(&registry, &cli, &config).build(&cli.source)?;
            output::print_tree(&graph, &cli.source);
            println!("==> Content is valid");
        }
        Command::Image {
            ref node,
            ref field,
            width,
            height,
            fill,
        } => {
            let config = config::load_config(&cli.source)?;
            init_thread_pool(&config.processing);
            let transformer = Arc::new(open_transformer(&cli.source, &config)?);
            let registry = TypeRegistry::standard();
            let graph = builder(&registry, &cli, &config)
                .with_transformer(Arc::clone(&transformer))
                .build(&cli.source)?;
            let renderer =
                Renderer::new(&graph, &cli.output).with_base_url(config.base_url.clone());

            let path = ContentPath::parse(&node)?;
            let image = find_image(&graph, &path, &field)?;
            let picture = transformer.transform(&renderer, image, width, height, fill)?;
            transformer.flush()?;

            let mime = native_mime_type(image.file().file_name()).unwrap_or("image");
            for line in output::format_picture(&format!("{path} {field}"), mime, &picture) {
                println!("{}", line);
            }
            println!("Cache: {}", transformer.resize_cache().stats());
        }
        Command::Cache { clear } => {
            let config = config::load_config(&cli.source)?;
            let transformer = open_transformer(&cli.source, &config)?;
            if clear {
                transformer.info_cache().clear()?;
                transformer.resize_cache().clear()?;
                println!("==> Cleared {}", config.cache.root(&cli.source).display());
            }
            output::print_cache_summaries(&[
                CacheSummary::of(transformer.info_cache()),
                CacheSummary::of(transformer.resize_cache()),
            ]);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Graph builder skipping the cache and output directories, which may live
/// inside the content root.
fn builder<'a>(registry: &'a TypeRegistry, cli: &Cli, config: &SiteConfig) -> GraphBuilder<'a> {
    GraphBuilder::new(registry)
        .skip(config.cache.root(&cli.source))
        .skip(cli.output.clone())
}

fn open_transformer(source: &Path, config: &SiteConfig) -> Result<ImageTransformer, CacheError> {
    Ok(ImageTransformer::open(
        &config.cache.root(source),
        config.cache.capacity()?,
        Arc::new(RustBackend::new()),
    )?
    .with_webp(config.images.webp)
    .with_quality(config.images.quality()))
}

fn find_image<'g>(
    graph: &'g ContentGraph,
    path: &ContentPath,
    field: &str,
) -> Result<&'g sitegraph::node::ImageAsset, String> {
    let node = graph
        .find(path)
        .ok_or_else(|| format!("No content at {path}"))?;
    node.field(field)
        .and_then(|v| v.as_image())
        .ok_or_else(|| format!("{path} has no image field `{field}`"))
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores; the user can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
