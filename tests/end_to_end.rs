//! End-to-end scenarios against a real SQLite-backed dataset on a temp
//! directory: a `tempfile::TempDir`, `#[tokio::test]` async functions,
//! plain filesystem setup instead of mocked I/O.

use std::path::Path;

use dronedb_core::build::cog::{self, CogBackend};
use dronedb_core::build::{self as build_mod, BuildContext};
use dronedb_core::delta::{apply_delta, get_delta, MergeStrategy};
use dronedb_core::entry::EntryType;
use dronedb_core::index::{IndexDatabase, Options};
use dronedb_core::tiling::{PlaceholderRasterTiler, TileCache, TileKey};

fn write_file(path: &Path, contents: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

#[tokio::test]
async fn init_add_and_stamp() {
    let dir = tempfile::tempdir().unwrap();
    let ddb_path = IndexDatabase::init(dir.path()).await.unwrap();
    assert!(ddb_path.join("dbase.sqlite").exists());

    let photo = dir.path().join("photo.JPG");
    write_file(&photo, b"fake jpeg bytes");

    let db = IndexDatabase::open(dir.path(), false).await.unwrap();
    let mut added = Vec::new();
    db.add(&[photo.clone()], &Options::default(), |entry, _updated| {
        added.push(entry.clone());
    })
    .await
    .unwrap();

    assert_eq!(added.len(), 1);
    assert_eq!(added[0].entry_type, EntryType::Image);

    let stamp = db.stamp().await.unwrap();
    assert_eq!(stamp.entries.len(), 1);
    assert_eq!(stamp.entries[0].path, "photo.JPG");
    assert!(!stamp.entries[0].hash.is_empty());
    assert!(!stamp.checksum.is_empty());

    let json = serde_json::to_value(&stamp).unwrap();
    assert_eq!(json["entries"][0]["photo.JPG"], serde_json::json!(stamp.entries[0].hash));
    assert!(json["meta"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn add_synthesizes_missing_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    IndexDatabase::init(dir.path()).await.unwrap();
    let nested = dir.path().join("a").join("b").join("c.txt");
    write_file(&nested, b"leaf");

    let db = IndexDatabase::open(dir.path(), false).await.unwrap();
    db.add(&[nested], &Options::default(), |_, _| {}).await.unwrap();

    let all = db.list(&["*".to_string()], None).await.unwrap();
    let paths: Vec<&str> = all.iter().map(|e| e.path.as_str()).collect();
    assert!(paths.contains(&"a"));
    assert!(paths.contains(&"a/b"));
    assert!(paths.contains(&"a/b/c.txt"));

    let a_dir = all.iter().find(|e| e.path == "a").unwrap();
    assert_eq!(a_dir.entry_type, EntryType::Directory);
}

#[tokio::test]
async fn sync_detects_deletion() {
    let dir = tempfile::tempdir().unwrap();
    IndexDatabase::init(dir.path()).await.unwrap();
    let photo = dir.path().join("photo.JPG");
    write_file(&photo, b"fake jpeg bytes");

    let db = IndexDatabase::open(dir.path(), false).await.unwrap();
    db.add(&[photo.clone()], &Options::default(), |_, _| {}).await.unwrap();

    std::fs::remove_file(&photo).unwrap();
    let changes = db.sync(&Options::default()).await.unwrap();
    assert_eq!(changes.len(), 1);
    match &changes[0] {
        dronedb_core::index::ChangeLine::Deleted(path) => assert_eq!(path, "photo.JPG"),
        other => panic!("expected Deleted, got {other:?}"),
    }

    let stamp = db.stamp().await.unwrap();
    assert!(stamp.entries.is_empty());
}

#[tokio::test]
async fn delta_round_trip_between_two_datasets() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    IndexDatabase::init(dir_a.path()).await.unwrap();
    IndexDatabase::init(dir_b.path()).await.unwrap();

    write_file(&dir_a.path().join("x.txt"), b"xxx");
    write_file(&dir_a.path().join("y.txt"), b"yyy");
    write_file(&dir_b.path().join("y.txt"), b"yyy");
    write_file(&dir_b.path().join("z.txt"), b"zzz");

    let db_a = IndexDatabase::open(dir_a.path(), false).await.unwrap();
    db_a.add(
        &[dir_a.path().join("x.txt"), dir_a.path().join("y.txt")],
        &Options::default(),
        |_, _| {},
    )
    .await
    .unwrap();

    let db_b = IndexDatabase::open(dir_b.path(), false).await.unwrap();
    db_b.add(
        &[dir_b.path().join("y.txt"), dir_b.path().join("z.txt")],
        &Options::default(),
        |_, _| {},
    )
    .await
    .unwrap();

    let stamp_a = db_a.stamp().await.unwrap();
    let stamp_b = db_b.stamp().await.unwrap();

    let delta = get_delta(&stamp_a, &stamp_b);
    assert_eq!(delta.adds.len(), 1);
    assert_eq!(delta.adds[0].path, "x.txt");
    assert_eq!(delta.removes.len(), 1);
    assert_eq!(delta.removes[0].path, "z.txt");

    let conflicts = apply_delta(&delta, dir_a.path(), &db_b, MergeStrategy::KeepTheirs, &[])
        .await
        .unwrap();
    assert!(conflicts.is_empty());

    assert!(dir_b.path().join("x.txt").exists());
    assert!(!dir_b.path().join("z.txt").exists());

    let new_stamp_b = db_b.stamp().await.unwrap();
    assert!(new_stamp_b.equivalent(&stamp_a));
}

#[tokio::test]
async fn merge_conflict_is_reported_and_leaves_destination_untouched() {
    let dir_src = tempfile::tempdir().unwrap();
    let dir_dst = tempfile::tempdir().unwrap();
    IndexDatabase::init(dir_src.path()).await.unwrap();
    IndexDatabase::init(dir_dst.path()).await.unwrap();

    write_file(&dir_src.path().join("f.tif"), b"source version");
    write_file(&dir_dst.path().join("f.tif"), b"destination version");

    let db_src = IndexDatabase::open(dir_src.path(), false).await.unwrap();
    db_src
        .add(&[dir_src.path().join("f.tif")], &Options::default(), |_, _| {})
        .await
        .unwrap();

    let db_dst = IndexDatabase::open(dir_dst.path(), false).await.unwrap();
    db_dst
        .add(&[dir_dst.path().join("f.tif")], &Options::default(), |_, _| {})
        .await
        .unwrap();

    let stamp_src = db_src.stamp().await.unwrap();
    let stamp_dst = db_dst.stamp().await.unwrap();
    let delta = get_delta(&stamp_src, &stamp_dst);

    let conflicts = apply_delta(&delta, dir_src.path(), &db_dst, MergeStrategy::DontMerge, &[])
        .await
        .unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].path, "f.tif");
    assert_eq!(
        std::fs::read(dir_dst.path().join("f.tif")).unwrap(),
        b"destination version"
    );

    let conflicts = apply_delta(&delta, dir_src.path(), &db_dst, MergeStrategy::KeepOurs, &[])
        .await
        .unwrap();
    assert!(conflicts.is_empty());
    assert_eq!(
        std::fs::read(dir_dst.path().join("f.tif")).unwrap(),
        b"destination version"
    );

    let conflicts = apply_delta(&delta, dir_src.path(), &db_dst, MergeStrategy::KeepTheirs, &[])
        .await
        .unwrap();
    assert!(conflicts.is_empty());
    assert_eq!(
        std::fs::read(dir_dst.path().join("f.tif")).unwrap(),
        b"source version"
    );
}

#[tokio::test]
async fn tile_cache_is_single_flight_and_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("raster.tif");
    write_file(&source, b"pretend georeferenced raster");

    let profile_root = dir.path().join("profile");
    std::fs::create_dir_all(&profile_root).unwrap();
    let profile = dronedb_core::profile::UserProfile::at(profile_root);
    let tiler = CountingTiler::default();
    let cache = TileCache::new(&profile, &tiler);

    let key = TileKey { z: 14, x: 8603, y: 5946 };
    let (a, b) = tokio::join!(
        cache.get_tile(&source, 256, key, false),
        cache.get_tile(&source, 256, key, false),
    );
    let path_a = a.unwrap();
    let path_b = b.unwrap();
    assert_eq!(path_a, path_b);
    assert_eq!(std::fs::read(&path_a).unwrap(), std::fs::read(&path_b).unwrap());
    assert_eq!(tiler.builds.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[derive(Default)]
struct CountingTiler {
    builds: std::sync::atomic::AtomicUsize,
}

impl dronedb_core::tiling::RasterTiler for CountingTiler {
    fn render_tile(
        &self,
        source: &Path,
        key: TileKey,
        tile_size: u32,
    ) -> dronedb_core::Result<Vec<u8>> {
        self.builds.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        PlaceholderRasterTiler.render_tile(source, key, tile_size)
    }

    fn is_georeferenced(&self, _source: &Path) -> bool {
        true
    }
}

#[tokio::test]
async fn cog_fast_path_is_byte_identical_copy() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("ortho.tif");
    write_file(&input, b"already a cog");

    let entry = dronedb_core::entry::Entry {
        path: "ortho.tif".to_string(),
        hash: "deadbeef".to_string(),
        entry_type: EntryType::GeoRaster,
        properties: serde_json::Value::Object(Default::default()),
        mtime: 0,
        size: 13,
        depth: 0,
        point_geom: None,
        polygon_geom: None,
        meta: None,
    };

    let ctx = BuildContext::default();
    let artifacts = build_mod::build_one(&ctx, dir.path(), &input, &entry).unwrap();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].kind, "cog");

    let inspection = cog::CopyOnlyCogBackend.inspect(&input).unwrap();
    assert!(inspection.is_optimized_cog());

    let produced = build_mod::build_dir(dir.path(), &entry.hash).join("cog.tif");
    assert_eq!(std::fs::read(&produced).unwrap(), std::fs::read(&input).unwrap());
}
