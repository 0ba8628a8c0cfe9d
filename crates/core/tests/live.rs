use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, UNIX_EPOCH};

use kbox_core::{
    catalog, BadRecordPolicy, Beat, Broadcaster, Catalog, CatalogHandle, CatalogReloader, HeartbeatGenerator,
    ScriptedTicker, Song,
};

#[test]
fn every_subscriber_sees_the_full_beat_sequence() {
    let beats: Broadcaster<Beat> = Broadcaster::new();
    let listeners: Vec<_> = (0..3)
        .map(|_| {
            let cursor = beats.subscribe();
            thread::spawn(move || cursor.map(|beat| beat.count).collect::<Vec<_>>())
        })
        .collect();

    let ticker = ScriptedTicker::evenly(UNIX_EPOCH, Duration::from_secs(5), 50);
    HeartbeatGenerator::new(ticker, beats).spawn().unwrap().join().unwrap();

    let expected: Vec<u64> = (1..=50).collect();
    for listener in listeners {
        assert_eq!(listener.join().unwrap(), expected);
    }
}

#[test]
fn readers_never_see_a_mix_of_generations() {
    let handle = CatalogHandle::new();
    let keys: Vec<String> = (0..20).map(|i| format!("show/songs/{i}")).collect();

    let generation = |tag: &str, number: u64| {
        let songs: HashMap<String, Arc<Song>> = keys
            .iter()
            .map(|key| {
                let song = Song {
                    name: tag.to_string(),
                    ..Song::default()
                };
                (key.clone(), Arc::new(song))
            })
            .collect();
        Catalog::new(songs, number)
    };
    handle.replace(generation("0", 0)).unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let handle = handle.clone();
            let keys = keys.clone();
            thread::spawn(move || {
                for _ in 0..500 {
                    let snapshot = handle.snapshot().unwrap();
                    let first = snapshot.lookup(&keys[0]).unwrap().name.clone();
                    for key in &keys {
                        assert_eq!(snapshot.lookup(key).unwrap().name, first);
                    }
                }
            })
        })
        .collect();

    for number in 1..200u64 {
        handle.replace(generation(&number.to_string(), number)).unwrap();
    }
    for reader in readers {
        reader.join().unwrap();
    }
}

#[test]
fn reloader_serves_songs_by_request_path() {
    let dir = tempfile::tempdir().unwrap();
    let songs_dir = dir.path().join("songs");
    fs::create_dir(&songs_dir).unwrap();
    fs::write(
        songs_dir.join("oh_darling.sng"),
        "song { name: \"Oh! Darling\" line { text: \"Oh! Darling\" start_ms: 0 } }",
    )
    .unwrap();

    let handle = CatalogHandle::new();
    CatalogReloader::new(&songs_dir, Duration::from_secs(5), handle.clone())
        .reload_once()
        .unwrap();

    let key = catalog::song_key(&songs_dir, "oh_darling.sng");
    let song = handle.lookup_path(&format!("/{key}")).unwrap().unwrap();
    assert_eq!(song.name, "Oh! Darling");
    assert!(handle.lookup_path("/show/songs/missing").unwrap().is_none());
}

fn write_tagged(dir: &Path, files: usize, tag: u64) {
    for i in 0..files {
        fs::write(
            dir.join(format!("song{i}.sng")),
            format!("song {{ name: \"{tag}\" line {{ text: \"take {tag}\" start_ms: {i} }} }}"),
        )
        .unwrap();
    }
}

#[test]
fn reload_cycles_publish_whole_catalogs_to_parallel_readers() {
    const FILES: usize = 12;
    let dir = tempfile::tempdir().unwrap();
    write_tagged(dir.path(), FILES, 0);

    let handle = CatalogHandle::new();
    let reloader = CatalogReloader::new(dir.path(), Duration::from_secs(60), handle.clone());
    reloader.reload_once().unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let handle = handle.clone();
            thread::spawn(move || {
                let mut last_generation = 0;
                for _ in 0..2_000 {
                    let snapshot = handle.snapshot().unwrap();
                    assert!(snapshot.generation() >= last_generation);
                    last_generation = snapshot.generation();
                    assert_eq!(snapshot.len(), FILES);

                    let names: Vec<String> = snapshot
                        .keys()
                        .into_iter()
                        .map(|key| snapshot.lookup(key).unwrap().name.clone())
                        .collect();
                    assert!(names.iter().all(|name| *name == names[0]), "mixed catalog: {names:?}");
                }
                last_generation
            })
        })
        .collect();

    let writer = thread::spawn(move || {
        for tag in 1..=30 {
            write_tagged(dir.path(), FILES, tag);
            let built = reloader.reload_once().unwrap();
            assert_eq!(built.len(), FILES);
        }
        reloader
    });

    let reloader = writer.join().unwrap();
    for reader in readers {
        assert!(reader.join().unwrap() <= 31);
    }
    let last = reloader.handle().snapshot().unwrap();
    assert_eq!(last.generation(), 31);
    assert!(last.keys().into_iter().all(|key| last.lookup(key).unwrap().name == "30"));
}

#[test]
fn reloader_skips_pathological_song_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("good.sng"), "song { name: \"Good\" }").unwrap();
    fs::write(dir.path().join("deep.sng"), "song ".to_string() + &"line {".repeat(10_000)).unwrap();
    fs::write(dir.path().join("torn.sng"), "song { name: \"Torn").unwrap();

    let handle = CatalogHandle::new();
    let built = CatalogReloader::new(dir.path(), Duration::from_secs(5), handle.clone())
        .with_policy(BadRecordPolicy::Skip)
        .reload_once()
        .unwrap();

    assert_eq!(built.len(), 1);
    let key = catalog::song_key(dir.path(), "good.sng");
    assert_eq!(handle.lookup(&key).unwrap().unwrap().name, "Good");
}
