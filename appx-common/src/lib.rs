// Copyright 2024 Google LLC
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

use std::{fmt, io, rc::Rc};

use deku::DekuError;
use flate2::CompressError;

/// Common error type making it easier to share `Result`s between APPX crates.
///
/// In general designed to avoid needing utilities like `map_err`.
#[derive(Debug, Clone)]
pub enum AppxError {
    /// appx-cli encountered an error while processing something specific to
    /// the command line implementation. For example, no inputs were passed
    /// via the shell.
    Cli(String),
    /// An error occurred while reading an input file or writing the package.
    Io(Rc<io::Error>),
    /// A mapping file passed with `-f` failed to parse. Carries the file
    /// name (or `-` for standard input) and the offending line number.
    MalformedMappingFile { path: String, line: u64 },
    /// Directory traversal found a filesystem object that is neither a
    /// regular file, a symlink, nor a directory (a FIFO, socket, ...).
    UnsupportedInput(String),
    /// The DEFLATE encoder reported a failure. See [CompressError].
    Compression(Rc<CompressError>),
    /// A cryptographic operation failed: PKCS#12 parsing, PKCS#11 access,
    /// RSA signing, certificate decoding, or DER encoding.
    Crypto(String),
    /// A size, offset, or count does not fit the fixed-width archive field
    /// it is being written to. Carries the field name.
    OutOfRange(&'static str),
    /// `-b` was given but no `AppxMetadata/AppxBundleManifest.xml` entry
    /// exists among the inputs.
    MissingBundleManifest,
    /// Contradictory or incomplete signing options were passed, such as
    /// `-c` together with `-m`, or `-m` without a slot and key id.
    IncompatibleOptions(String),
    /// One of the binary archive records failed to serialise. See
    /// [DekuError].
    ///
    /// **If you experience this, it is considered an internal bug in the
    /// packager. Please report it.**
    Serialization(DekuError),
}

/// Result type where the error is always [AppxError].
pub type Result<T> = std::result::Result<T, AppxError>;

impl fmt::Display for AppxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppxError::Cli(message) => write!(f, "{message}"),
            AppxError::Io(err) => write!(f, "{err}"),
            AppxError::MalformedMappingFile { path, line } => {
                write!(f, "Malformed mapping file: {path}:{line}")
            }
            AppxError::UnsupportedInput(path) => {
                write!(f, "Unsupported input: {path}")
            }
            AppxError::Compression(err) => write!(f, "DEFLATE failed: {err}"),
            AppxError::Crypto(detail) => write!(f, "{detail}"),
            AppxError::OutOfRange(field) => {
                write!(f, "Number out of range for {field}")
            }
            AppxError::MissingBundleManifest => {
                write!(f, "You need to provide AppxMetadata/AppxBundleManifest.xml!")
            }
            AppxError::IncompatibleOptions(message) => write!(f, "{message}"),
            AppxError::Serialization(err) => {
                write!(f, "Record serialisation failed: {err}")
            }
        }
    }
}

// Automatic conversion from other types of error to AppxError makes the rest
// of the code cleaner.
impl From<io::Error> for AppxError {
    fn from(value: io::Error) -> Self {
        AppxError::Io(value.into())
    }
}

impl From<CompressError> for AppxError {
    fn from(value: CompressError) -> Self {
        AppxError::Compression(value.into())
    }
}

impl From<DekuError> for AppxError {
    fn from(value: DekuError) -> Self {
        AppxError::Serialization(value)
    }
}

impl From<rsa::Error> for AppxError {
    fn from(value: rsa::Error) -> Self {
        AppxError::Crypto(format!("RSA signing failed: {value}"))
    }
}

impl From<rsa::pkcs8::Error> for AppxError {
    fn from(value: rsa::pkcs8::Error) -> Self {
        AppxError::Crypto(format!("Private key decoding failed: {value}"))
    }
}

impl From<rasn::error::EncodeError> for AppxError {
    fn from(value: rasn::error::EncodeError) -> Self {
        AppxError::Crypto(format!("DER encoding failed: {value}"))
    }
}

impl From<rasn::error::DecodeError> for AppxError {
    fn from(value: rasn::error::DecodeError) -> Self {
        AppxError::Crypto(format!("DER decoding failed: {value}"))
    }
}

/// Narrows an integer into the fixed-width field it is about to be written
/// to, reporting the field name on overflow.
pub fn fit<T, S: TryInto<T>>(value: S, field: &'static str) -> Result<T> {
    value.try_into().map_err(|_| AppxError::OutOfRange(field))
}
