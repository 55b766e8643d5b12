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

pub mod client;
pub mod conf;
mod errors;
pub mod filesystem;
pub mod lister;
pub mod metadata;
pub mod path;
pub mod reader;
pub mod sse;
pub mod writer;

pub use self::conf::S3Options;
pub use self::filesystem::S3FileSystem;
pub use self::lister::FileInfoBatches;
pub use self::path::S3Path;
pub use self::reader::ObjectReader;
pub use self::writer::ObjectWriter;

pub const SCHEME: &str = "s3";
pub const FOLDER_SUFFIX: &str = "/";

#[macro_export]
macro_rules! err_s3 {
    ($e:expr) => ({
        Err(cirrus_common::err_msg!($e).into())
    });

    ($f:tt, $($arg:expr),+) => ({
        cirrus_common::err_box!(format!($f, $($arg),+))
    });
}
