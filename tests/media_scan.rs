use std::fs;
use std::path::Path;
use std::time::Duration;

use image::{Rgba, RgbaImage};
use signage_display::config::Configuration;
use signage_display::media::{MediaKind, scan_configured, scan_media_dir};
use signage_display::processing::loader::load_still;

fn write_png(path: &Path, w: u32, h: u32) {
    RgbaImage::from_pixel(w, h, Rgba([0, 128, 255, 255]))
        .save(path)
        .unwrap();
}

fn config_for(dir: &Path) -> Configuration {
    Configuration {
        media_dir: dir.to_path_buf(),
        ..Configuration::default()
    }
    .validated()
    .unwrap()
}

#[test]
fn scan_is_flat_sorted_and_filtered() {
    let dir = tempfile::tempdir().unwrap();
    write_png(&dir.path().join("b.png"), 4, 4);
    write_png(&dir.path().join("a.PNG"), 4, 4);
    fs::write(dir.path().join("clip.mp4"), b"not really a video").unwrap();
    fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
    write_png(&dir.path().join(".hidden.png"), 4, 4);
    fs::create_dir(dir.path().join("nested")).unwrap();
    write_png(&dir.path().join("nested").join("deep.png"), 4, 4);

    let items = scan_configured(&config_for(dir.path())).unwrap();
    let names: Vec<String> = items
        .iter()
        .map(|item| item.path().file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, ["a.PNG", "b.png", "clip.mp4"]);
    assert_eq!(items[2].kind(), MediaKind::Video);
    assert!(!items[0].is_video());
}

#[test]
fn scan_keeps_the_first_paths_in_order_at_the_entry_cap() {
    let dir = tempfile::tempdir().unwrap();
    // Created in reverse so listing order and path order disagree.
    for idx in (0..12).rev() {
        fs::write(dir.path().join(format!("{idx:02}.jpg")), b"x").unwrap();
    }
    let items = scan_media_dir(dir.path(), &["jpg".to_string()], 5).unwrap();
    let names: Vec<String> = items
        .iter()
        .map(|item| item.path().file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, ["00.jpg", "01.jpg", "02.jpg", "03.jpg", "04.jpg"]);
}

#[test]
fn overwritten_file_is_new_content() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.png");
    write_png(&path, 40, 30);
    let before = scan_configured(&config_for(dir.path())).unwrap();
    let again = scan_configured(&config_for(dir.path())).unwrap();
    assert!(before[0].is_same_content(&again[0]));

    write_png(&path, 60, 20);
    let after = scan_configured(&config_for(dir.path())).unwrap();
    assert!(!before[0].is_same_content(&after[0]));
    assert_eq!(after[0].info(Duration::from_secs(1)).dimensions, Some((60, 20)));
}

#[test]
fn missing_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("gone");
    assert!(scan_media_dir(&missing, &["jpg".to_string()], 10).is_err());
}

#[test]
fn image_info_reads_header_dimensions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("photo.png");
    write_png(&path, 32, 18);
    let items = scan_configured(&config_for(dir.path())).unwrap();
    let info = items[0].info(Duration::from_secs(1));
    assert_eq!(info.dimensions, Some((32, 18)));
    assert_eq!(info.format, ".PNG");
    let summary = info.image_summary();
    assert_eq!(summary[0], "Name: photo.png");
    assert_eq!(summary[4], "Dim: 32x18");
}

#[test]
fn corrupt_image_is_a_media_load_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.png");
    fs::write(&path, b"\x89PNG\r\n\x1a\ngarbage").unwrap();
    let err = load_still(&path, (64, 48)).unwrap_err();
    assert!(!err.is_fatal());
    assert!(err.to_string().contains("broken.png"), "{err}");
}
