// Copyright 2025 the Cirrus Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! End-to-end tests against a live endpoint (Minio or AWS). Configure via
//! CIRRUS_S3_ENDPOINT, CIRRUS_S3_BUCKET, CIRRUS_S3_ACCESS_KEY,
//! CIRRUS_S3_SECRET_KEY and optionally CIRRUS_S3_REGION; without an
//! endpoint the tests are skipped.

use cirrus_common::fs::{FileSelector, FileType};
use cirrus_common::runtime::AsyncRuntime;
use cirrus_s3::{S3FileSystem, S3Options};
use std::collections::HashMap;
use std::sync::Arc;

fn get_options() -> Option<(S3Options, String)> {
    let endpoint = std::env::var("CIRRUS_S3_ENDPOINT").ok()?;
    let bucket = std::env::var("CIRRUS_S3_BUCKET").ok()?;
    let options = S3Options {
        region: std::env::var("CIRRUS_S3_REGION").unwrap_or_default(),
        scheme: "http".to_string(),
        endpoint_override: endpoint,
        access_key: std::env::var("CIRRUS_S3_ACCESS_KEY").ok(),
        secret_key: std::env::var("CIRRUS_S3_SECRET_KEY").ok(),
        allow_bucket_creation: true,
        allow_delayed_open: true,
        ..Default::default()
    };
    Some((options, bucket))
}

#[test]
fn run_test() {
    let (options, bucket) = match get_options() {
        Some(v) => v,
        None => {
            println!("Not found s3 conf, skip s3 test");
            return;
        }
    };

    let rt = Arc::new(AsyncRuntime::default("s3-fs-test"));
    let fs = rt
        .block_on(S3FileSystem::new(options, rt.clone()))
        .unwrap();

    rt.clone().block_on(async move {
        let base = format!("{}/cirrus-fs-test", bucket);

        fs.create_dir(&bucket, true).await.unwrap();
        mkdir(&fs, &base).await;
        write_read(&fs, &base).await;
        stat(&fs, &base).await;
        list(&fs, &base).await;
        rename_and_delete(&fs, &base).await;

        fs.delete_dir_contents(&base, true).await.unwrap();
    });
}

async fn mkdir(fs: &S3FileSystem, base: &str) {
    fs.create_dir(&format!("{}/a", base), true).await.unwrap();
    fs.create_dir(&format!("{}/b/c", base), true).await.unwrap();

    let info = fs.get_file_info(&format!("{}/a", base)).await.unwrap();
    assert_eq!(info.file_type, FileType::Directory);

    // Idempotent creation.
    fs.create_dir(&format!("{}/a", base), true).await.unwrap();
}

async fn write_read(fs: &S3FileSystem, base: &str) {
    let path = format!("{}/test.log", base);
    let payload: Vec<u8> = (0..100 * 1024).map(|i| (i % 251) as u8).collect();

    let mut writer = fs
        .open_output_stream(&path, HashMap::new())
        .await
        .unwrap();
    for chunk in payload.chunks(1024) {
        writer.write(chunk).await.unwrap();
    }
    writer.close().await.unwrap();

    let mut reader = fs.open_input_file(&path).await.unwrap();
    assert_eq!(reader.size().unwrap(), payload.len() as i64);

    let mut read_back = Vec::new();
    loop {
        let chunk = reader.read(8192).await.unwrap();
        if chunk.is_empty() {
            break;
        }
        read_back.extend_from_slice(&chunk);
    }
    assert_eq!(read_back, payload);

    // Ranged read.
    let middle = reader.read_at(1000, 24).await.unwrap();
    assert_eq!(&middle[..], &payload[1000..1024]);
}

async fn stat(fs: &S3FileSystem, base: &str) {
    let info = fs.get_file_info(&format!("{}/test.log", base)).await.unwrap();
    assert_eq!(info.file_type, FileType::File);
    assert_eq!(info.size, 100 * 1024);

    let info = fs.get_file_info(&format!("{}/missing", base)).await.unwrap();
    assert_eq!(info.file_type, FileType::NotFound);

    // An implicit directory, visible through its child.
    let info = fs.get_file_info(&format!("{}/b", base)).await.unwrap();
    assert_eq!(info.file_type, FileType::Directory);
}

async fn list(fs: &S3FileSystem, base: &str) {
    let entries = fs.list_info(FileSelector::new(base)).await.unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name()).collect();
    assert!(names.contains(&"a"));
    assert!(names.contains(&"b"));
    assert!(names.contains(&"test.log"));

    let entries = fs.list_info(FileSelector::recursive(base)).await.unwrap();
    assert!(entries.iter().any(|e| e.name() == "c" && e.is_dir()));
}

async fn rename_and_delete(fs: &S3FileSystem, base: &str) {
    let src = format!("{}/test.log", base);
    let dest = format!("{}/a/moved.log", base);

    fs.rename(&src, &dest).await.unwrap();
    let info = fs.get_file_info(&dest).await.unwrap();
    assert_eq!(info.file_type, FileType::File);
    let info = fs.get_file_info(&src).await.unwrap();
    assert_eq!(info.file_type, FileType::NotFound);

    fs.delete_file(&dest).await.unwrap();
    assert!(fs.delete_file(&dest).await.unwrap_err().is_not_found());
}
