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

pub mod error;
pub mod fs;
pub mod runtime;

pub use self::error::{FsError, FsResult};

// Create an error message and add the file and line where it occurred.
#[macro_export]
macro_rules! err_msg {
    ($e:expr) => ({
        format!("{}({}:{})", $e, file!(), line!())
    });

    ($f:tt, $($arg:expr),+) => ({
        format!("{}({}:{})", format!($f, $($arg),+), file!(), line!())
    });
}

// Convert an error message into an Err(FsError) return value.
// There are two forms:
// 1. String error: err_box!("{}", "error")
// 2. Error error: err_box!(std::error::Error)
#[macro_export]
macro_rules! err_box {
    ($e:expr) => ({
        Err($crate::err_msg!($e).into())
    });

    ($f:tt, $($arg:expr),+) => ({
        $crate::err_box!(format!($f, $($arg),+))
    });
}

// Unified conversion error type.
#[macro_export]
macro_rules! try_err {
    ($expr:expr) => {{
        match $expr {
            Ok(r) => r,
            Err(e) => return $crate::err_box!(e),
        }
    }};
}

/// Equivalent to:
/// match x.as_ref() {
///     None => return err_box!("Uninitialized"),
///     Some(v) => v
/// };
#[macro_export]
macro_rules! try_option {
    ($expr:expr) => {{
        match $expr {
            None => return $crate::err_box!("Uninitialized"),
            Some(res) => res,
        }
    }};

    ($expr:expr, $f:tt, $($arg:expr),+) => ({
        match $expr {
            None => return $crate::err_box!(format!($f, $($arg),+)),
            Some(res) => res,
        }
    });
}

#[cfg(test)]
mod tests {
    use crate::FsResult;

    #[test]
    fn err_box() {
        let err_str: FsResult<()> = err_box!("not found file: {}", "/d1.log");
        println!("err_str = {:?}", err_str);
        assert!(err_str.is_err());

        let err_box: FsResult<()> = err_box!(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset"
        ));
        println!("err_box = {:?}", err_box);
        assert!(err_box.is_err());
    }

    #[test]
    fn try_opt() -> FsResult<()> {
        let mut x = Some("123".to_string());
        let v = try_option!(x.as_mut());
        println!("{}", v);

        Ok(())
    }

    fn open() -> FsResult<std::fs::File> {
        let f = try_err!(std::fs::File::open("xxxxx.log"));
        Ok(f)
    }

    #[test]
    fn try1() {
        let x = open();
        println!("{:?}", x);
        assert!(x.is_err());
    }
}
