/* ---------------------------------------------------------------------------
    spfsctl - Sunflower flash filesystem tool, sunflowerkernel.org
    Copyright (C) 2026 janicria

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU General Public License as published by
    the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU General Public License for more details.

    You should have received a copy of the GNU General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
--------------------------------------------------------------------------- */

/*!
    spfsctl/src/main.rs

    spfsctl's entry point
*/

use clap::{
    Arg, ArgMatches, Command, arg,
    builder::{
        Styles,
        styling::{Color, RgbColor, Style},
    },
    command, value_parser,
};
use cmd::CtlError;
use config::Config;
use std::process;

/// The color used for headers and usage.
const CORNFLOWER_BLUE: Color = Color::Rgb(RgbColor(120, 172, 255));

/// The color used for literals.
const PURPLE_BLUE: Color = Color::Rgb(RgbColor(163, 158, 255));

mod cmd;
mod config;
mod logger;

fn main() {
    let mut command = command!()
        .about("Creates, inspects and modifies sunflower flash filesystem images")
        .override_usage("spfsctl [OPTIONS] COMMAND")
        .styles(
            Styles::styled()
                .usage(Style::new().bold().fg_color(Some(CORNFLOWER_BLUE)))
                .header(Style::new().bold().fg_color(Some(CORNFLOWER_BLUE)))
                .literal(Style::new().bold().fg_color(Some(PURPLE_BLUE))),
        )
        .subcommand(
            Command::new("mkfs")
                .about("Erases the filesystem region and creates a new filesystem in it")
                .arg(arg!(size: -s --size <BYTES> "The size of the filesystem").value_parser(value_parser!(u32)))
                .arg(arg!(name: -n --name <NAME> "The name of the filesystem"))
                .arg(arg!(root: -r --root <NAME> "The name of the root directory")),
        )
        .subcommand(
            Command::new("dir, ls")
                .alias("dir")
                .alias("ls")
                .about("Lists the contents of a directory")
                .arg(arg!([PATH] "The directory to list").default_value("/")),
        )
        .subcommand(
            Command::new("md, mkdir")
                .alias("md")
                .alias("mkdir")
                .about("Creates a directory")
                .arg(arg!(<PATH> "The directory to create"))
                .arg(arg!(parents: -p --parents "Creates any missing parent directories too")),
        )
        .subcommand(
            Command::new("cat")
                .about("Prints the contents of a file")
                .arg(arg!(<PATH> "The file to print"))
                .arg(
                    arg!(version: -v --revision <N> "Prints an older version, 0 being the newest")
                        .value_parser(value_parser!(usize))
                        .default_value("0"),
                ),
        )
        .subcommand(
            Command::new("store")
                .about("Copies a file into the filesystem, adding a new version if it already exists")
                .arg(arg!(<SOURCE> "The file to copy"))
                .arg(arg!(<PATH> "Where to store it")),
        )
        .subcommand(
            Command::new("rm")
                .about("Removes a file or directory from it's parent, without freeing any space")
                .arg(arg!(<PATH> "The file or directory to remove")),
        )
        .subcommand(
            Command::new("ln")
                .about("Links an existing file or directory into another directory")
                .arg(arg!(<TARGET> "The file or directory to link"))
                .arg(arg!(<DEST> "The directory to link it into"))
                .arg(arg!(name: -n --name <NAME> "Gives a linked file a new name")),
        )
        .subcommand(
            Command::new("versions")
                .about("Lists every version of a file")
                .arg(arg!(<PATH> "The file to inspect")),
        )
        .subcommand(
            Command::new("fsinfo")
                .about("Shows how full the filesystem is")
                .arg(arg!(map: -m --map "Also draws what every block is used for")),
        )
        .args(args());

    let matches = command.clone().get_matches();
    logger::init(matches.get_flag("debug"));

    let config = match Config::load(matches.get_one::<String>("config").map(String::as_str)) {
        Ok(config) => with_overrides(config, &matches),
        Err(e) => fail(e, 2),
    };

    let Some((name, args)) = matches.subcommand() else {
        _ = command.print_help(); // show help if no commands are specified
        return;
    };

    if let Err(e) = run(&config, name, args) {
        fail(e, 1)
    }
}

/// Runs the subcommand `name`.
fn run(config: &Config, name: &str, args: &ArgMatches) -> Result<(), CtlError> {
    let path = || args.get_one::<String>("PATH").map_or("/", String::as_str);
    let opt = |id: &str| args.get_one::<String>(id).map(String::as_str);

    match name {
        "mkfs" => cmd::mkfs(config, args.get_one("size").copied(), opt("name"), opt("root")),
        "dir, ls" => cmd::dir(config, path()),
        "md, mkdir" => cmd::md(config, path(), args.get_flag("parents")),
        "cat" => cmd::cat(config, path(), args.get_one("version").copied().unwrap_or(0)),
        "store" => cmd::store(config, opt("SOURCE").unwrap_or_default(), path()),
        "rm" => cmd::rm(config, path()),
        "ln" => cmd::ln(config, opt("TARGET").unwrap_or_default(), opt("DEST").unwrap_or("/"), opt("name")),
        "versions" => cmd::versions(config, path()),
        "fsinfo" => cmd::fsinfo(config, args.get_flag("map")),
        s => unreachable!("got unknown command: {s}"),
    }
}

/// Applies the image options given on the command line over the config file.
fn with_overrides(mut config: Config, matches: &ArgMatches) -> Config {
    if let Some(path) = matches.get_one::<String>("image") {
        config.image.path = path.clone();
    }
    if let Some(size) = matches.get_one::<u32>("flash_size") {
        config.image.size = *size;
    }
    if let Some(offset) = matches.get_one::<u32>("offset") {
        config.image.offset = *offset;
    }
    config
}

/// Prints `err` and exits with `code`.
fn fail(err: CtlError, code: i32) -> ! {
    eprintln!("error: {err}");
    process::exit(code)
}

/// The optional arguments for spfsctl.
fn args() -> [Arg; 5] {
    [
        arg!(debug: -d --debug "Prints what the filesystem is doing").global(true),
        arg!(config: -c --config <FILE> "The config file to use instead of ./spfs.toml").global(true),
        arg!(image: -i --image <FILE> "The flash image to operate on").global(true),
        arg!(flash_size: -S --"flash-size" <BYTES> "The capacity of the flash")
            .value_parser(value_parser!(u32))
            .global(true),
        arg!(offset: -o --offset <BYTES> "The sector aligned address the filesystem starts at")
            .value_parser(value_parser!(u32))
            .global(true),
    ]
}
