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

use appx_zip::ZipFileEntry;

/// Every package listed in `AppxBundleManifest.xml` carries an `Offset`
/// attribute pointing at its data inside the final bundle. The offsets are
/// unknowable before packaging, so the manifest author writes the
/// placeholder `<archive-name>-offset` (e.g. `App.appx-offset`) and this
/// pass substitutes the real decimal offsets once the sub-packages have
/// been written.
///
/// The token is matched literally; a payload whose own name ends in
/// `-offset` would collide with it, and what happens then is undefined.
pub fn populate_manifest_offsets(manifest: &str, entries: &[ZipFileEntry]) -> String {
    let mut text = manifest.to_owned();
    for entry in entries {
        let token = format!("{}-offset", entry.file_name);
        if text.contains(&token) {
            text = text.replace(&token, &entry.data_offset().to_string());
        }
    }
    text
}
