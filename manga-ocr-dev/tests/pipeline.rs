//! Manga109 export, background extraction, synthetic generation and dataset
//! loading run end to end on a tiny fixture.

use std::path::Path;

use image::{Rgba, RgbaImage};
use manga_ocr_dev::{
    charsets::Charsets,
    data::{
        backgrounds::{generate_backgrounds, BackgroundOptions},
        manga109::{export_crops, export_frames, read_csv},
        BackgroundCatalog,
    },
    synthetic::{
        fonts::FontRow,
        run_generate::{run_generate, MetaRow, PackageOptions},
        FontCatalog, HtmlRenderer, LengthDistribution, Renderer, SyntheticDataGenerator,
    },
    training::load_entries,
    DataPaths,
};
use rand::{rngs::StdRng, SeedableRng};

const RELEASE_DIR: &str = "Manga109s_released_2021_02_28";

const XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<book title="Tiny">
  <pages>
    <page index="0" width="200" height="200">
      <frame id="f1" xmin="0" ymin="0" xmax="200" ymax="200"/>
      <text id="t1" xmin="180" ymin="180" xmax="195" ymax="195">テスト</text>
    </page>
  </pages>
</book>"#;

/// Fills a dark block per paragraph.
struct BlockRenderer;

impl HtmlRenderer for BlockRenderer {
    fn render(&self, html: &str, _css: &str, size: (u32, u32)) -> manga_ocr_dev::Result<RgbaImage> {
        let mut img = RgbaImage::new(size.0.max(64), size.1.max(64));
        for (i, _) in html.match_indices("<p>").enumerate() {
            for x in 8..40 {
                img.put_pixel(x, 8 + 2 * i as u32, Rgba([20, 20, 20, 255]));
            }
        }
        Ok(img)
    }
}

fn data_paths(root: &Path) -> DataPaths {
    DataPaths {
        assets: root.join("assets"),
        fonts_root: root.join("fonts"),
        synthetic_root: root.join("synthetic"),
        background_dir: root.join("backgrounds"),
        manga109_root: root.join("Manga109s"),
        train_root: root.join("out"),
    }
}

fn write_manga109(root: &Path) {
    let release = root.join(RELEASE_DIR);
    std::fs::create_dir_all(release.join("annotations")).unwrap();
    std::fs::create_dir_all(release.join("images/Tiny")).unwrap();
    std::fs::write(release.join("books.txt"), "Tiny\n").unwrap();
    std::fs::write(release.join("annotations/Tiny.xml"), XML).unwrap();
    image::RgbImage::from_pixel(200, 200, image::Rgb([235, 235, 235]))
        .save(release.join("images/Tiny/000.jpg"))
        .unwrap();
}

#[test]
fn test_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let paths = data_paths(dir.path());
    let mut rng = StdRng::seed_from_u64(11);

    write_manga109(&paths.manga109_root);
    assert_eq!(export_frames(&paths.manga109_root).unwrap(), 1);
    assert_eq!(export_crops(&paths.manga109_root, &mut rng).unwrap(), 1);
    assert!(paths.manga109_root.join("crops/t1.png").is_file());

    let options = BackgroundOptions {
        crops_per_page: 20,
        min_size: 40,
    };
    let saved =
        generate_backgrounds(&paths.manga109_root, &paths.background_dir, &options, &mut rng)
            .unwrap();
    assert!(saved > 0);
    let backgrounds = BackgroundCatalog::load(&paths.background_dir).unwrap();
    // identical rectangles overwrite each other
    assert!(!backgrounds.is_empty() && backgrounds.len() <= saved);
    assert!(backgrounds.entries().iter().all(|b| b.h >= 40 && b.w >= 40));

    let vocab: Vec<char> = "あいうえおかきくけこさしすせそのアイウエオテスト日本語".chars().collect();
    let fonts = FontCatalog::from_rows(
        vec![FontRow {
            font_path: "Regular.ttf".into(),
            supported_chars: Some(vocab.iter().collect()),
            num_chars: vocab.len(),
            label: "regular".into(),
        }],
        &paths.fonts_root,
    );
    let generator = SyntheticDataGenerator::new(
        Charsets::from_vocab(vocab),
        LengthDistribution::new(vec![(4, 1.0), (8, 1.0)]).unwrap(),
        fonts,
        Renderer::new(Box::new(BlockRenderer), backgrounds),
    )
    .unwrap();

    let lines_dir = paths.synthetic_root.join("lines");
    std::fs::create_dir_all(&lines_dir).unwrap();
    std::fs::write(
        lines_dir.join("0000.csv"),
        "source,id,line\ncc-100,cc-100_0,日本語のテスト\n",
    )
    .unwrap();

    let opts = PackageOptions {
        package: 0,
        n_random: 3,
        n_limit: None,
        max_workers: 2,
        seed: Some(5),
    };
    let meta_path = run_generate(&generator, &paths.synthetic_root, &opts).unwrap();
    let meta: Vec<MetaRow> = read_csv(&meta_path).unwrap();
    assert_eq!(meta.len(), 4);
    for row in &meta {
        assert_eq!(row.font_path, "Regular.ttf");
        assert!(!row.text.is_empty());
        assert!(paths
            .synthetic_root
            .join("img/0000")
            .join(format!("{}.jpg", row.id))
            .is_file());
    }

    let entries = load_entries(&paths, "train", &[]).unwrap();
    assert_eq!(entries.len(), 5);
    assert_eq!(entries.iter().filter(|e| e.synthetic).count(), 4);
    assert_eq!(entries[4].text, "テスト");

    let skipped = load_entries(&paths, "train", &[0]).unwrap();
    assert_eq!(skipped.len(), 1);
}
