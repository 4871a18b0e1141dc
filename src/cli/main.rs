use intoto::models::{link_file_name, SignedMetadata};
use intoto::runlib::in_toto_run;
use intoto::signature::Key;
use intoto::verify::{Enforcement, LayoutVerifier, VerifyConfig};
use intoto::InTotoError;

use intoto::reexports::log;

use clap::{crate_description, crate_name, crate_version, Arg, ArgAction, ArgMatches, Command};
use regex::RegexBuilder;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

fn key_arg(required: bool) -> Arg {
    Arg::new("key")
        .value_name("key_file")
        .long("key")
        .short('k')
        .required(required)
        .help("PEM key file")
}

fn load_key(path: &str) -> Result<Key, InTotoError> {
    Key::from_file(path).map_err(|e| InTotoError::InvalidKey(format!("'{}': {}", path, e)))
}

fn start() -> Result<(), InTotoError> {
    let matches = Command::new(crate_name!())
        .version(crate_version!())
        .about(crate_description!())
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Prints debugging information"),
        )
        .subcommand(
            Command::new("key-id")
                .about("Print the key id of a key")
                .arg(key_arg(true)),
        )
        .subcommand(
            Command::new("sign")
                .about("Append a signature to a link or layout")
                .arg(
                    Arg::new("file")
                        .value_name("metadata_file")
                        .long("file")
                        .short('f')
                        .required(true)
                        .help("Signed link or layout"),
                )
                .arg(key_arg(true).action(ArgAction::Append))
                .arg(
                    Arg::new("output")
                        .value_name("output_file")
                        .long("output")
                        .short('o')
                        .help("Output file (defaults to overwriting the input)"),
                ),
        )
        .subcommand(
            Command::new("verify")
                .about("Verify a supply chain against its layout")
                .arg(
                    Arg::new("layout")
                        .value_name("layout_file")
                        .long("layout")
                        .short('l')
                        .required(true)
                        .help("Signed layout"),
                )
                .arg(
                    Arg::new("layout_keys")
                        .value_name("key_file")
                        .long("layout-key")
                        .short('k')
                        .required(true)
                        .action(ArgAction::Append)
                        .help("Public key of the layout owner (repeatable)"),
                )
                .arg(
                    Arg::new("link_dir")
                        .value_name("dir")
                        .long("link-dir")
                        .help("Directory containing link files"),
                )
                .arg(
                    Arg::new("strict_commands")
                        .long("strict-commands")
                        .action(ArgAction::SetTrue)
                        .help("Fail if a recorded command differs from the expected command"),
                )
                .arg(
                    Arg::new("no_inspections")
                        .long("no-inspections")
                        .action(ArgAction::SetTrue)
                        .help("Do not run the layout's inspections"),
                )
                .arg(
                    Arg::new("config")
                        .value_name("config_file")
                        .long("config")
                        .short('c')
                        .help("TOML verification settings"),
                ),
        )
        .subcommand(
            Command::new("run")
                .about("Record materials, run a command, record products and sign the link")
                .arg(
                    Arg::new("name")
                        .value_name("step")
                        .long("name")
                        .short('n')
                        .required(true)
                        .help("Step name"),
                )
                .arg(key_arg(true))
                .arg(
                    Arg::new("materials")
                        .value_name("path")
                        .long("materials")
                        .short('m')
                        .num_args(1..)
                        .action(ArgAction::Append)
                        .help("Paths recorded before the command"),
                )
                .arg(
                    Arg::new("products")
                        .value_name("path")
                        .long("products")
                        .short('p')
                        .num_args(1..)
                        .action(ArgAction::Append)
                        .help("Paths recorded after the command"),
                )
                .arg(
                    Arg::new("exclude")
                        .value_name("regex")
                        .long("exclude")
                        .short('e')
                        .help("Artifact paths to leave out"),
                )
                .arg(
                    Arg::new("envelope")
                        .long("envelope")
                        .action(ArgAction::SetTrue)
                        .help("Write the link as a signature envelope"),
                )
                .arg(
                    Arg::new("metadata_dir")
                        .value_name("dir")
                        .long("metadata-dir")
                        .help("Directory the link is written to"),
                )
                .arg(
                    Arg::new("command")
                        .value_name("command")
                        .last(true)
                        .num_args(1..)
                        .help("Command to run"),
                ),
        )
        .get_matches();

    let debug = matches.get_flag("debug");

    env_logger::builder()
        .format_timestamp(None)
        .format_level(false)
        .format_module_path(false)
        .format_target(false)
        .filter_level(if debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    if let Some(matches) = matches.subcommand_matches("key-id") {
        let key_file = matches
            .get_one::<String>("key")
            .ok_or(InTotoError::UsageError("Missing key file"))?;
        println!("{}", load_key(key_file)?.key_id());
    } else if let Some(matches) = matches.subcommand_matches("sign") {
        sign(matches)?;
    } else if let Some(matches) = matches.subcommand_matches("verify") {
        verify(matches)?;
    } else if let Some(matches) = matches.subcommand_matches("run") {
        run(matches)?;
    } else {
        return Err(InTotoError::UsageError("No subcommand specified"));
    }
    Ok(())
}

fn sign(matches: &ArgMatches) -> Result<(), InTotoError> {
    let input_file = matches
        .get_one::<String>("file")
        .ok_or(InTotoError::UsageError("Missing metadata file"))?;
    let output_file = matches.get_one::<String>("output").unwrap_or(input_file);

    let mut metadata = SignedMetadata::load(input_file)?;
    for key_file in matches.get_many::<String>("key").into_iter().flatten() {
        let key = load_key(key_file)?;
        if !key.has_private() {
            return Err(InTotoError::InvalidKey(format!("'{}' has no private key", key_file)));
        }
        metadata.sign(&key)?;
        log::debug!("Signed with {}", key.key_id());
    }
    metadata.dump(output_file)?;
    println!(
        "Signed {} written to {} ({} signature(s))",
        metadata.metadata().type_name(),
        output_file,
        metadata.signatures().len()
    );
    Ok(())
}

fn verify(matches: &ArgMatches) -> Result<(), InTotoError> {
    let layout_file = matches
        .get_one::<String>("layout")
        .ok_or(InTotoError::UsageError("Missing layout file"))?;

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => VerifyConfig::from_toml_file(path)?,
        None => VerifyConfig::default(),
    };
    if let Some(dir) = matches.get_one::<String>("link_dir") {
        config.link_dir = Some(PathBuf::from(dir));
    }
    if matches.get_flag("strict_commands") {
        config.command_alignment = Enforcement::Strict;
    }
    if matches.get_flag("no_inspections") {
        config.run_inspections = false;
    }

    let mut layout_keys = BTreeMap::new();
    for key_file in matches.get_many::<String>("layout_keys").into_iter().flatten() {
        let key = load_key(key_file)?.public_only();
        layout_keys.insert(key.key_id().to_string(), key);
    }

    let layout = SignedMetadata::load(layout_file)?;
    let summary = match LayoutVerifier::new(config).verify(&layout, &layout_keys) {
        Ok(summary) => summary,
        Err(InTotoError::PolicyViolations(violations)) => {
            eprintln!("Verification failed:");
            for violation in &violations {
                eprintln!("  - {}", violation);
            }
            return Err(InTotoError::PolicyViolations(violations));
        }
        Err(e) => return Err(e),
    };

    let warnings: Vec<_> = summary.warnings().collect();
    if !warnings.is_empty() {
        println!("Warnings:");
        for warning in warnings {
            println!("  - {}", warning);
        }
    }
    println!(
        "Verification passed: {} step(s), {} inspection(s), {} check(s)",
        summary.step_links.len(),
        summary.inspection_links.len(),
        summary.passed_checks()
    );
    Ok(())
}

fn run(matches: &ArgMatches) -> Result<(), InTotoError> {
    let name = matches
        .get_one::<String>("name")
        .ok_or(InTotoError::UsageError("Missing step name"))?;
    let key_file = matches
        .get_one::<String>("key")
        .ok_or(InTotoError::UsageError("Missing key file"))?;
    let key = load_key(key_file)?;
    if !key.has_private() {
        return Err(InTotoError::InvalidKey(format!("'{}' has no private key", key_file)));
    }

    let materials: Vec<&String> = matches.get_many::<String>("materials").into_iter().flatten().collect();
    let products: Vec<&String> = matches.get_many::<String>("products").into_iter().flatten().collect();
    let command: Vec<String> = matches
        .get_many::<String>("command")
        .into_iter()
        .flatten()
        .cloned()
        .collect();
    let exclude = matches
        .get_one::<String>("exclude")
        .map(|re| RegexBuilder::new(re).build())
        .transpose()
        .map_err(|e| InTotoError::ParseError(format!("exclude pattern: {}", e)))?;

    let link = in_toto_run(name, &materials, &products, &command, exclude.as_ref())?;
    if let Some(code) = link.return_value().filter(|code| *code != 0) {
        log::warn!("Command exited with {}", code);
    }

    let mut signed = if matches.get_flag("envelope") {
        SignedMetadata::new_envelope(link)?
    } else {
        SignedMetadata::new_metablock(link)
    };
    signed.sign(&key)?;

    let dir = matches
        .get_one::<String>("metadata_dir")
        .map(Path::new)
        .unwrap_or_else(|| Path::new("."));
    let path = dir.join(link_file_name(name, key.key_id()));
    signed.dump(&path)?;
    println!("Link written to {}", path.display());
    Ok(())
}

fn main() -> Result<(), InTotoError> {
    let res = start();
    match res {
        Ok(_) => {}
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
    Ok(())
}
