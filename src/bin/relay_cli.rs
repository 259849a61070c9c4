use std::{error::Error, io, net::SocketAddr, path::PathBuf};

use clap::Parser;
use datarelay::{
    Command, RelayClient, RelayConfig, cli::describe, config::SocketSettings, prompt,
};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Address of the relay server
    address: SocketAddr,
    /// TOML configuration to take socket settings from
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => RelayConfig::load(path)?.socket,
        None => SocketSettings::default(),
    };
    let client = RelayClient::connect(cli.address, settings)?;

    let stdio = io::stdin();
    let stdout = io::stdout();

    loop {
        let reader = stdio.lock();
        let writer = StdOut {
            inner: stdout.lock(),
        };

        let cmd = match prompt(reader, writer) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        match cmd {
            Command::Exit => break,
            Command::Empty => {}
            Command::Info => match client.runtime_info() {
                Ok(infos) => {
                    for info in infos {
                        println!(
                            "{}: {} messages handled, {} objects stored, up {}s",
                            info.component_name, info.messages_handled, info.objects_stored, info.uptime_secs
                        );
                    }
                }
                Err(e) => eprintln!("error: {e}"),
            },
            cmd => {
                let Some(mut message) = cmd.to_message() else {
                    continue;
                };
                match client.send_message(&mut message) {
                    Ok(()) => println!("{}", describe(&message)),
                    Err(e) => eprintln!("send error: {e}"),
                }
            }
        }
    }

    Ok(())
}

/// StdOut wrapper that flushes after every write, so the prompt shows before input.
struct StdOut<W: io::Write> {
    inner: W,
}

impl<W: io::Write> io::Write for StdOut<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let res = self.inner.write(buf);
        if res.is_ok() {
            self.inner.flush()?
        }
        res
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
