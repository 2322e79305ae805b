mod cli;
mod shell;

use std::io;

use anyhow::Context;
use clap::Parser;
use simplefs::io::FileBlockEmulatorBuilder;

use cli::Cli;
use shell::Shell;

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let dev = FileBlockEmulatorBuilder::from(cli.file.clone())
        .with_block_size(cli.block_size)
        .with_block_count(cli.blocks)
        .build();
    let mut shell = Shell::new(dev);

    if let Some(inodes) = cli.mkfs {
        shell
            .format(inodes)
            .with_context(|| format!("failed to create filesystem in {}", cli.file.display()))?;
        println!(
            "created filesystem with {} inodes in {}",
            inodes,
            cli.file.display()
        );
        return Ok(());
    }

    match shell.mount() {
        Ok(()) => println!("loaded filesystem from {}", cli.file.display()),
        Err(e) => println!("no filesystem in {}: {}", cli.file.display(), e),
    }
    println!("type `help` for a list of commands");

    let stdin = io::stdin();
    shell.run(stdin.lock(), io::stdout())?;
    Ok(())
}
