//! Command-line arguments.

use std::path::PathBuf;

use anyhow::{Context, bail};

pub const USAGE: &str = "\
usage: streamfile <command> [options]

commands:
  serve                          run the transfer server
  upload <identifier> <file>     send a local file
  download <identifier> <file>   fetch a stored file
  info                           show the server description
  token                          print a new random access token

options:
  --addr <host:port>    listen address (serve) or server address
  --token <token>       bearer token to require (serve) or send
  --verify              compare whole-file digests after the transfer
  --config <path>       server configuration file";

/// Default address the client connects to.
pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:7700";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Serve,
    Upload { identifier: String, file: PathBuf },
    Download { identifier: String, file: PathBuf },
    Info,
    Token,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Args {
    pub command: Command,
    pub addr: Option<String>,
    pub token: Option<String>,
    pub verify: bool,
    pub config: Option<PathBuf>,
}

impl Args {
    /// Parses arguments (without the program name).
    pub fn parse<I>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut positional = Vec::new();
        let mut addr = None;
        let mut token = None;
        let mut verify = false;
        let mut config = None;
        let mut help = false;

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--addr" => addr = Some(args.next().context("--addr needs a value")?),
                "--token" => token = Some(args.next().context("--token needs a value")?),
                "--config" => {
                    config = Some(PathBuf::from(
                        args.next().context("--config needs a value")?,
                    ));
                }
                "--verify" => verify = true,
                "-h" | "--help" => help = true,
                flag if flag.starts_with("--") => bail!("unknown option {flag}"),
                _ => positional.push(arg),
            }
        }

        let mut positional = positional.into_iter();
        if help {
            positional = Vec::new().into_iter();
        }
        let command = match positional.next().as_deref() {
            None | Some("help") => Command::Help,
            Some("serve") => Command::Serve,
            Some("info") => Command::Info,
            Some("token") => Command::Token,
            Some(name @ ("upload" | "download")) => {
                let identifier = positional
                    .next()
                    .with_context(|| format!("{name} needs an identifier"))?;
                let file = PathBuf::from(
                    positional
                        .next()
                        .with_context(|| format!("{name} needs a local file"))?,
                );
                if name == "upload" {
                    Command::Upload { identifier, file }
                } else {
                    Command::Download { identifier, file }
                }
            }
            Some(other) => bail!("unknown command '{other}'"),
        };
        if let Some(extra) = positional.next() {
            bail!("unexpected argument '{extra}'");
        }

        Ok(Self {
            command,
            addr,
            token,
            verify,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<Args> {
        Args::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn upload_with_flags() {
        let args = parse(&["upload", "tok-1", "game.bin", "--verify", "--addr", "10.0.0.2:7700"])
            .unwrap();
        assert_eq!(
            args.command,
            Command::Upload {
                identifier: "tok-1".into(),
                file: PathBuf::from("game.bin"),
            }
        );
        assert!(args.verify);
        assert_eq!(args.addr.as_deref(), Some("10.0.0.2:7700"));
        assert_eq!(args.token, None);
    }

    #[test]
    fn flags_may_come_first() {
        let args = parse(&["--token", "abc", "--config", "/etc/sf.json", "serve"]).unwrap();
        assert_eq!(args.command, Command::Serve);
        assert_eq!(args.token.as_deref(), Some("abc"));
        assert_eq!(args.config, Some(PathBuf::from("/etc/sf.json")));
    }

    #[test]
    fn no_arguments_is_help() {
        assert_eq!(parse(&[]).unwrap().command, Command::Help);
        assert_eq!(parse(&["info", "--help"]).unwrap().command, Command::Help);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse(&["download", "abc"]).is_err());
        assert!(parse(&["frobnicate"]).is_err());
        assert!(parse(&["info", "--fast"]).is_err());
        assert!(parse(&["serve", "--addr"]).is_err());
        assert!(parse(&["token", "extra"]).is_err());
    }
}
