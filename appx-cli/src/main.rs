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

//! Command line front end.
//!
//! ```text
//! $ appx -o app.appx -c signing.pfx -9 ./build
//! $ appx -o bundle.appxbundle -b -f mapping.txt
//! ```

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use appx_api::{write_package, InputMap, PackageOptions, SigningParams};
use appx_common::{AppxError, Result};
use clap::{Arg, ArgAction, Command};

mod inputs;

const BUNDLE_MANIFEST_NAME: &str = "AppxMetadata/AppxBundleManifest.xml";
const PIN_ENVIRONMENT_VARIABLE: &str = "APPX_PIV_PIN";

fn command() -> Command {
    let mut command = Command::new("appx")
        .about("Creates an optionally-signed Microsoft APPX or APPXBUNDLE package.")
        .after_help(
            "An input is either:\n\
             \x20 A directory, indicating that all files and subdirectories\n\
             \x20   of that directory are included in the package, or\n\
             \x20 A file name, indicating that the file is included in the\n\
             \x20   root of the package, or\n\
             \x20 An archive=local pair, or\n\
             \x20 A mapping file specified with the -f option.\n\
             \n\
             A mapping file has the following form:\n\
             \n\
             \x20 [Files]\n\
             \x20 \"/path/to/local/file.exe\" \"appx_file.exe\"\n\
             \n\
             Signing through a smartcard can be achieved as such:\n\
             -m /usr/lib/x86_64-linux-gnu/opensc-pkcs11.so -s 1 -k 0 -p passphrase\n\
             If no passphrase is provided, the APPX_PIV_PIN environment variable\n\
             will be used.\n\
             \n\
             Supported target systems:\n\
             \x20 Windows 10 (UAP)\n\
             \x20 Windows 10 Mobile",
        )
        .arg(
            Arg::new("output")
                .short('o')
                .value_name("OUTPUT_FILE")
                .required(true)
                .help("Write the APPX (or APPXBUNDLE if -b is specified) here"),
        )
        .arg(
            Arg::new("certificate")
                .short('c')
                .value_name("PFX_FILE")
                .help("Sign the package with this PKCS#12 private key file"),
        )
        .arg(
            Arg::new("module")
                .short('m')
                .value_name("MODULE_FILE")
                .help("A PKCS#11 module to use for smartcard signing"),
        )
        .arg(
            Arg::new("slot")
                .short('s')
                .value_name("SLOT")
                .value_parser(clap::value_parser!(u32))
                .help("The smartcard slot id"),
        )
        .arg(
            Arg::new("key")
                .short('k')
                .value_name("KEY_ID")
                .value_parser(clap::value_parser!(u8))
                .help("The smartcard key id"),
        )
        .arg(
            Arg::new("pin")
                .short('p')
                .value_name("PIN")
                .help("The smartcard PIN"),
        )
        .arg(
            Arg::new("bundle")
                .short('b')
                .action(ArgAction::SetTrue)
                .help("Produce an APPXBUNDLE instead of an APPX"),
        )
        .arg(
            Arg::new("mapping")
                .short('f')
                .value_name("MAP_FILE")
                .action(ArgAction::Append)
                .help("Read inputs from a mapping file (- for standard input)"),
        )
        .arg(
            Arg::new("inputs")
                .value_name("INPUT")
                .num_args(0..)
                .help("archive=local pairs, files, or directories to package"),
        );
    for level in 0u32..=9 {
        let help = match level {
            0 => "No ZIP compression (store files; the default)",
            9 => "Best ZIP compression",
            _ => "ZIP compression level",
        };
        command = command.arg(
            Arg::new(format!("level{level}"))
                .short(char::from(b'0' + level as u8))
                .action(ArgAction::SetTrue)
                .help(help),
        );
    }
    command
}

/// The last compression flag on the command line wins, like getopt.
fn compression_level(matches: &clap::ArgMatches) -> u32 {
    let mut selected = 0;
    let mut last_index = 0;
    for level in 0u32..=9 {
        let id = format!("level{level}");
        if matches.get_flag(&id) {
            if let Some(index) = matches.index_of(id.as_str()) {
                if index >= last_index {
                    last_index = index;
                    selected = level;
                }
            }
        }
    }
    selected
}

fn signing_params(matches: &clap::ArgMatches) -> Result<Option<SigningParams>> {
    let certificate = matches.get_one::<String>("certificate");
    let module = matches.get_one::<String>("module");
    if certificate.is_some() && module.is_some() {
        return Err(AppxError::IncompatibleOptions(
            "Incompatible -c & -m options provided".into(),
        ));
    }
    if let Some(path) = certificate {
        return Ok(Some(SigningParams::CertificateFile {
            path: PathBuf::from(path),
        }));
    }
    let Some(module_path) = module else {
        return Ok(None);
    };
    let slot_id = *matches.get_one::<u32>("slot").ok_or_else(|| {
        AppxError::IncompatibleOptions("Missing -s parameter for smartcard signing".into())
    })?;
    let key_id = *matches.get_one::<u8>("key").ok_or_else(|| {
        AppxError::IncompatibleOptions("Missing -k parameter for smartcard signing".into())
    })?;
    let pin = match matches.get_one::<String>("pin") {
        Some(pin) => pin.clone(),
        None => std::env::var(PIN_ENVIRONMENT_VARIABLE).map_err(|_| {
            AppxError::IncompatibleOptions("No PIV passphrase provided".into())
        })?,
    };
    Ok(Some(SigningParams::SmartCard {
        module_path: PathBuf::from(module_path),
        slot_id,
        key_id,
        pin,
    }))
}

fn collect_inputs(matches: &clap::ArgMatches) -> Result<InputMap> {
    let mut inputs = InputMap::new();
    if let Some(mappings) = matches.get_many::<String>("mapping") {
        for mapping in mappings {
            if mapping == "-" {
                inputs::read_mapping_file(io::stdin().lock(), "-", &mut inputs)?;
            } else {
                let file = File::open(mapping)?;
                inputs::read_mapping_file(BufReader::new(file), mapping, &mut inputs)?;
            }
        }
    }
    if let Some(positionals) = matches.get_many::<String>("inputs") {
        for input in positionals {
            if let Some((archive_name, local_path)) = input.split_once('=') {
                inputs
                    .entry(archive_name.to_string())
                    .or_insert_with(|| PathBuf::from(local_path));
            } else {
                inputs::collect_path(Path::new(input), &mut inputs)?;
            }
        }
    }
    if inputs.is_empty() {
        return Err(AppxError::Cli("Missing inputs".into()));
    }
    Ok(inputs)
}

fn run(matches: &clap::ArgMatches) -> Result<()> {
    let options = PackageOptions {
        compression_level: compression_level(matches),
        bundle: matches.get_flag("bundle"),
        signing: signing_params(matches)?,
    };
    let inputs = collect_inputs(matches)?;
    if options.bundle && !inputs.contains_key(BUNDLE_MANIFEST_NAME) {
        return Err(AppxError::MissingBundleManifest);
    }

    let output_path = PathBuf::from(matches.get_one::<String>("output").expect("required"));
    let output = File::create(&output_path)?;
    match write_package(BufWriter::new(output), &inputs, &options) {
        Ok(()) => Ok(()),
        Err(err) => {
            // never leave a half-written package behind
            let _ = std::fs::remove_file(&output_path);
            Err(err)
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    // clap wants to exit with 2 on usage errors; every failure here exits
    // with 1, so unpack the parse by hand.
    let matches = match command().try_get_matches() {
        Ok(matches) => matches,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                // -h lands here
                ExitCode::SUCCESS
            };
        }
    };
    match run(&matches) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
