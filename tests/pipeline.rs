//! End-to-end: load → validate → render boundary → image transform, through
//! the public API with the pure-Rust image backend.

use image::{RgbImage, RgbaImage};
use serde_json::json;
use sitegraph::cache::CacheCapacity;
use sitegraph::context::{LoaderContext, Phase, ResolveError};
use sitegraph::graph::{BuildError, ContentGraph, GraphBuilder};
use sitegraph::imaging::{FillMode, ImageTransformer, RustBackend};
use sitegraph::path::ContentPath;
use sitegraph::render::{Renderable, Renderer};
use sitegraph::schema::TypeRegistry;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn write_file(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn p(s: &str) -> ContentPath {
    ContentPath::parse(s).unwrap()
}

struct Site {
    tmp: TempDir,
}

impl Site {
    fn content(&self) -> PathBuf {
        self.tmp.path().join("content")
    }

    fn output(&self) -> PathBuf {
        self.tmp.path().join("dist")
    }

    fn cache(&self) -> PathBuf {
        self.tmp.path().join("cache")
    }

    fn transformer(&self) -> Arc<ImageTransformer> {
        Arc::new(
            ImageTransformer::open(
                &self.cache(),
                CacheCapacity::default(),
                Arc::new(RustBackend::new()),
            )
            .unwrap(),
        )
    }

    fn build(
        &self,
        transformer: Option<Arc<ImageTransformer>>,
    ) -> Result<ContentGraph, BuildError> {
        let registry = TypeRegistry::standard();
        let mut builder = GraphBuilder::new(&registry);
        if let Some(t) = transformer {
            builder = builder.with_transformer(t);
        }
        builder.build(&self.content())
    }
}

/// A small blog with a gallery: forward references, a property file and
/// real images.
fn site() -> Site {
    let site = Site {
        tmp: TempDir::new().unwrap(),
    };
    let root = site.content();
    write_file(
        &root,
        "_index.toml",
        "type = \"website\"\ntitle = \"Home\"\nnavigation = [\"blog\", \"gallery\"]\n",
    );
    write_file(
        &root,
        "010-blog/_index.toml",
        "type = \"section\"\ntitle = \"Blog\"\nindex = \"first\"\n",
    );
    write_file(
        &root,
        "010-blog/010-first.toml",
        concat!(
            "type = \"article\"\ntitle = \"First post\"\nrelated = [\"../second\"]\n",
            "body = \"See [the gallery](/gallery/sunset).\"\n",
        ),
    );
    write_file(
        &root,
        "010-blog/020-second.toml",
        "type = \"article\"\ntitle = \"Second post\"\n",
    );
    write_file(&root, "020-gallery/_index.toml", "type = \"section\"\ntitle = \"Gallery\"\n");
    write_file(
        &root,
        "020-gallery/sunset/_index.toml",
        "type = \"image-page\"\ntitle = \"Sunset\"\nimage = \"hero.png\"\n",
    );
    write_file(
        &root,
        "020-gallery/sunset/caption.md",
        "Taken [after the first post](../../blog/first).\n",
    );
    RgbImage::from_fn(320, 240, |x, y| image::Rgb([(x % 256) as u8, (y % 256) as u8, 90]))
        .save(root.join("020-gallery/sunset/hero.png"))
        .unwrap();
    site
}

#[test]
fn every_node_round_trips_through_the_render_boundary() {
    let site = site();
    let graph = site.build(None).unwrap();
    let renderer = Renderer::new(&graph, site.output());

    assert_eq!(graph.phase(), Phase::Ready);
    assert_eq!(graph.len(), 6);
    for node in graph.iter() {
        let path = renderer.find_path_of(node).unwrap();
        let found = renderer.find_node_by_path(path).unwrap();
        assert_eq!(renderer.find_path_of(found), Some(path));
    }
}

#[test]
fn forward_reference_resolves_to_later_sibling() {
    let site = site();
    let graph = site.build(None).unwrap();
    let first = graph.find(&p("/blog/first")).unwrap();
    let related = &first.field("related").unwrap().as_list().unwrap()[0];
    let target = graph.node(related.as_reference().unwrap().target());
    assert_eq!(target.path(), &p("/blog/second"));
    assert_eq!(target.title(), Some("Second post"));
}

#[test]
fn dangling_reference_fails_the_build() {
    let site = site();
    write_file(
        &site.content(),
        "010-blog/030-third.toml",
        "type = \"article\"\ntitle = \"Third\"\nrelated = [\"../fourth\"]\n",
    );
    let err = site.build(None).unwrap_err();
    assert!(matches!(err, BuildError::Validation(_)));
    assert!(err.to_string().contains("Invalid content path: /blog/fourth"), "{err}");
}

#[test]
fn broken_markdown_link_fails_the_build() {
    let site = site();
    write_file(
        &site.content(),
        "010-blog/020-second.toml",
        "type = \"article\"\ntitle = \"Second post\"\nbody = \"[gone](../nowhere)\"\n",
    );
    let err = site.build(None).unwrap_err();
    assert!(err.to_string().contains("Invalid content path: /blog/nowhere"), "{err}");
}

#[test]
fn resolving_while_loading_is_a_phase_violation() {
    let ctx = LoaderContext::new();
    let err = ctx.resolve(&ContentPath::root(), "blog").unwrap_err();
    assert!(matches!(err, ResolveError::Phase(_)));
}

#[test]
fn markdown_links_render_as_hrefs() {
    let site = site();
    let graph = site.build(None).unwrap();
    let renderer = Renderer::new(&graph, site.output());

    let sunset = graph.find(&p("/gallery/sunset")).unwrap();
    let caption = sunset
        .field("caption")
        .unwrap()
        .render(&renderer.context(sunset), None)
        .unwrap();
    assert!(
        caption.contains(r#"<a href="/blog/first/" title="First post">after the first post</a>"#),
        "{caption}"
    );

    let first = graph.find(&p("/blog/first")).unwrap();
    let body = first.field("body").unwrap().render(&renderer.context(first), None).unwrap();
    assert!(body.contains(r#"href="/gallery/sunset/""#), "{body}");
}

#[test]
fn transform_writes_resized_images_into_the_output_tree() {
    let site = site();
    let transformer = site.transformer();
    let graph = site.build(Some(Arc::clone(&transformer))).unwrap();
    let renderer = Renderer::new(&graph, site.output());
    let hero = graph
        .find(&p("/gallery/sunset"))
        .unwrap()
        .field("image")
        .unwrap()
        .as_image()
        .unwrap();

    let picture = transformer
        .transform(&renderer, hero, 100, 50, FillMode::Cover)
        .unwrap();

    assert_eq!(picture.image.href, "/gallery/sunset/Cover_100x50_orig_hero.png");
    let primary = site.output().join("gallery/sunset/Cover_100x50_orig_hero.png");
    assert_eq!(image::image_dimensions(&primary).unwrap(), (100, 50));

    assert_eq!(picture.sources.len(), 1);
    assert_eq!(picture.sources[0].mime_type, "image/webp");
    let webp = site.output().join("gallery/sunset/Cover_100x50_webp_hero.png.webp");
    assert_eq!(image::image_dimensions(&webp).unwrap(), (100, 50));
}

#[test]
fn fit_keeps_aspect_ratio() {
    let site = site();
    let transformer = site.transformer();
    let graph = site.build(Some(Arc::clone(&transformer))).unwrap();
    let renderer = Renderer::new(&graph, site.output());
    let sunset = graph.find(&p("/gallery/sunset")).unwrap();

    let args = json!({"width": 160, "height": 160, "fill": "fit"});
    let href = sunset
        .field("image")
        .unwrap()
        .render(&renderer.context(sunset), Some(&args))
        .unwrap();
    assert_eq!(href, "/gallery/sunset/Fit_160x160_orig_hero.png");
    let file = site.output().join("gallery/sunset/Fit_160x160_orig_hero.png");
    assert_eq!(image::image_dimensions(file).unwrap(), (160, 120));
}

#[test]
fn second_run_is_served_from_the_disk_cache() {
    let site = site();
    {
        let transformer = site.transformer();
        let graph = site.build(Some(Arc::clone(&transformer))).unwrap();
        let renderer = Renderer::new(&graph, site.output());
        let hero = graph.find(&p("/gallery/sunset")).unwrap().field("image").unwrap();
        transformer
            .transform(&renderer, hero.as_image().unwrap(), 64, 64, FillMode::Cover)
            .unwrap();
        transformer.flush().unwrap();
    }

    fs::remove_dir_all(site.output()).unwrap();
    let transformer = site.transformer();
    let graph = site.build(Some(Arc::clone(&transformer))).unwrap();
    let renderer = Renderer::new(&graph, site.output());
    let hero = graph.find(&p("/gallery/sunset")).unwrap().field("image").unwrap();
    let picture = transformer
        .transform(&renderer, hero.as_image().unwrap(), 64, 64, FillMode::Cover)
        .unwrap();

    assert_eq!(transformer.resize_cache().stats().computed, 0);
    assert!(site.output().join(picture.image.href.trim_start_matches('/')).is_file());
}

#[test]
fn animated_gif_is_published_unresized() {
    let site = site();
    write_file(
        &site.content(),
        "020-gallery/spinner/_index.toml",
        "type = \"image-page\"\ntitle = \"Spinner\"\nimage = \"spin.gif\"\n",
    );
    {
        let file = fs::File::create(site.content().join("020-gallery/spinner/spin.gif")).unwrap();
        let mut encoder = image::codecs::gif::GifEncoder::new(file);
        let frames = (0..3u8).map(|i| {
            image::Frame::new(RgbaImage::from_pixel(40, 30, image::Rgba([i * 80, 0, 0, 255])))
        });
        encoder.encode_frames(frames).unwrap();
    }

    let transformer = site.transformer();
    let graph = site.build(Some(Arc::clone(&transformer))).unwrap();
    let renderer = Renderer::new(&graph, site.output());
    let spinner = graph
        .find(&p("/gallery/spinner"))
        .unwrap()
        .field("image")
        .unwrap()
        .as_image()
        .unwrap();

    let picture = transformer
        .transform(&renderer, spinner, 10, 10, FillMode::Cover)
        .unwrap();
    assert_eq!(picture.image.href, "/gallery/spinner/spin.gif");
    assert_eq!((picture.image.width, picture.image.height), (40, 30));
    assert!(picture.sources.is_empty());
    assert!(transformer.resize_cache().is_empty());
}

#[test]
fn changed_source_replaces_published_artifact() {
    let site = site();
    let hero_path = site.content().join("020-gallery/sunset/hero.png");
    let publish = |expected: (u32, u32)| {
        let transformer = site.transformer();
        let graph = site.build(Some(Arc::clone(&transformer))).unwrap();
        let renderer = Renderer::new(&graph, site.output());
        let hero = graph
            .find(&p("/gallery/sunset"))
            .unwrap()
            .field("image")
            .unwrap()
            .as_image()
            .unwrap();
        let picture = transformer
            .transform(&renderer, hero, 1000, 1000, FillMode::NoResize)
            .unwrap();
        transformer.flush().unwrap();
        assert_eq!((picture.image.width, picture.image.height), expected);
        let published = site.output().join(picture.image.href.trim_start_matches('/'));
        assert_eq!(image::image_dimensions(&published).unwrap(), expected);
    };

    publish((320, 240));
    RgbImage::from_fn(200, 100, |x, y| image::Rgb([(y % 256) as u8, (x % 256) as u8, 10]))
        .save(&hero_path)
        .unwrap();
    publish((200, 100));
}

#[test]
fn render_macro_places_resized_image_in_markdown() {
    let site = site();
    write_file(
        &site.content(),
        "020-gallery/sunset/caption.md",
        concat!(
            "Evening light.\n\n",
            "{{render content=node.image arguments='{\"width\": 100, \"height\": 50}' /}}\n",
        ),
    );
    let transformer = site.transformer();
    let graph = site.build(Some(Arc::clone(&transformer))).unwrap();
    let renderer = Renderer::new(&graph, site.output());
    let sunset = graph.find(&p("/gallery/sunset")).unwrap();

    let caption = sunset
        .field("caption")
        .unwrap()
        .render(&renderer.context(sunset), None)
        .unwrap();
    assert!(
        caption.contains("<p>/gallery/sunset/Cover_100x50_orig_hero.png</p>"),
        "{caption}"
    );
    let published = site.output().join("gallery/sunset/Cover_100x50_orig_hero.png");
    assert_eq!(image::image_dimensions(published).unwrap(), (100, 50));
}

#[test]
fn malformed_render_macro_fails_the_build() {
    let site = site();
    write_file(
        &site.content(),
        "020-gallery/sunset/caption.md",
        "{{render arguments='{}'}}\n",
    );
    let err = site.build(None).unwrap_err();
    assert!(matches!(err, BuildError::Validation(_)));
    assert!(err.to_string().contains("missing `content`"), "{err}");
}
