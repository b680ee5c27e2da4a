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

//! Collecting the input map: mapping files and filesystem traversal.

use std::fs;
use std::io::BufRead;
use std::path::Path;

use appx_api::InputMap;
use appx_common::{AppxError, Result};

/// Reads a mapping file of the form
///
/// ```text
/// [Files]
/// "/path/to/local/file.exe" "appx_file.exe"
/// ```
///
/// Blank lines are skipped, surrounding whitespace is tolerated, quotes are
/// literal (no escape processing). The first archive binding for a name
/// wins. Malformed content is reported with `source_name` and the line
/// number.
pub fn read_mapping_file(
    reader: impl BufRead,
    source_name: &str,
    inputs: &mut InputMap,
) -> Result<()> {
    let malformed = |line: u64| AppxError::MalformedMappingFile {
        path: source_name.to_string(),
        line,
    };
    let mut saw_header = false;
    for (index, line) in reader.lines().enumerate() {
        let line_number = index as u64 + 1;
        let line = line?;
        let line = line.trim_matches([' ', '\t']);
        if line.is_empty() {
            continue;
        }
        if !saw_header {
            if line != "[Files]" {
                return Err(malformed(line_number));
            }
            saw_header = true;
            continue;
        }
        let (local_path, archive_name) =
            parse_mapping_line(line).ok_or_else(|| malformed(line_number))?;
        inputs
            .entry(archive_name.to_string())
            .or_insert_with(|| local_path.into());
    }
    Ok(())
}

/// Parses one `"local" "archive"` pair; `None` when the line is malformed.
fn parse_mapping_line(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix('"')?;
    let (local_path, rest) = rest.split_once('"')?;
    if local_path.is_empty() {
        return None;
    }
    let rest = rest.trim_start_matches([' ', '\t']);
    let rest = rest.strip_prefix('"')?;
    let (archive_name, rest) = rest.split_once('"')?;
    if archive_name.is_empty() || !rest.is_empty() {
        return None;
    }
    Some((local_path, archive_name))
}

/// Adds a positional path argument to the input map. A file lands in the
/// package root under its own name; a directory is walked physically
/// (symlinks are archived as the files they point at, never followed as
/// directories) and its contents are archived relative to the directory
/// itself.
pub fn collect_path(path: &Path, inputs: &mut InputMap) -> Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        return walk_directory(path, String::new(), inputs);
    }
    if metadata.is_file() || metadata.is_symlink() {
        let archive_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| AppxError::UnsupportedInput(path.display().to_string()))?;
        inputs
            .entry(archive_name)
            .or_insert_with(|| path.to_path_buf());
        return Ok(());
    }
    Err(AppxError::UnsupportedInput(path.display().to_string()))
}

fn walk_directory(directory: &Path, prefix: String, inputs: &mut InputMap) -> Result<()> {
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk_directory(&entry.path(), format!("{prefix}{name}/"), inputs)?;
        } else if file_type.is_file() || file_type.is_symlink() {
            inputs
                .entry(format!("{prefix}{name}"))
                .or_insert_with(|| entry.path());
        } else {
            return Err(AppxError::UnsupportedInput(entry.path().display().to_string()));
        }
    }
    Ok(())
}
