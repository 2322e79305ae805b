use std::io::{self, BufRead, Write};
use std::str::FromStr;

use log::debug;
use simplefs::io::BlockStorage;
use simplefs::{FileSystem, SFSError, Vfs};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command {0:?}, type `help` for a list of commands")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("no filesystem mounted, create one with `mkfs <inodes>`")]
    NotMounted,
    #[error("{0:?} is not a valid number")]
    BadNumber(String),
    #[error("the number of inodes must be positive")]
    NoInodes,
    #[error(transparent)]
    Fs(#[from] SFSError),
}

/// What the loop should do after a line was executed.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    Print(String),
    Exit,
}

enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl Arity {
    fn accepts(&self, n: usize) -> bool {
        match *self {
            Arity::Exactly(want) => n == want,
            Arity::AtLeast(want) => n >= want,
        }
    }
}

/// Arguments following the command name.
struct Args<'a> {
    words: Vec<&'a str>,
    line: &'a str,
}

impl<'a> Args<'a> {
    fn new(line: &'a str) -> Self {
        Self {
            words: line.split_whitespace().collect(),
            line,
        }
    }

    fn word(&self, i: usize) -> &'a str {
        self.words[i]
    }

    fn number<N: FromStr>(&self, i: usize) -> Result<N, CommandError> {
        self.words[i]
            .parse()
            .map_err(|_| CommandError::BadNumber(self.words[i].to_string()))
    }

    /// The raw text after the first `skip` words, inner spacing kept.
    fn tail(&self, skip: usize) -> &'a str {
        let mut rest = self.line.trim_start();
        for _ in 0..skip {
            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            rest = rest[end..].trim_start();
        }
        rest
    }
}

type Handler<T> = fn(&mut Shell<T>, &Args) -> Result<String, CommandError>;

struct Command<T: BlockStorage> {
    name: &'static str,
    usage: &'static str,
    about: &'static str,
    arity: Arity,
    needs_fs: bool,
    run: Handler<T>,
}

fn commands<T: BlockStorage>() -> [Command<T>; 13] {
    [
        Command {
            name: "help",
            usage: "help",
            about: "show this list",
            arity: Arity::Exactly(0),
            needs_fs: false,
            run: Shell::<T>::help,
        },
        Command {
            name: "mkfs",
            usage: "mkfs <inodes>",
            about: "create a filesystem with room for <inodes> files",
            arity: Arity::Exactly(1),
            needs_fs: false,
            run: Shell::<T>::mkfs,
        },
        Command {
            name: "stat",
            usage: "stat <name>",
            about: "show file metadata",
            arity: Arity::Exactly(1),
            needs_fs: true,
            run: Shell::<T>::stat,
        },
        Command {
            name: "ls",
            usage: "ls",
            about: "list files",
            arity: Arity::Exactly(0),
            needs_fs: true,
            run: Shell::<T>::ls,
        },
        Command {
            name: "create",
            usage: "create <name>",
            about: "create an empty file",
            arity: Arity::Exactly(1),
            needs_fs: true,
            run: Shell::<T>::create,
        },
        Command {
            name: "open",
            usage: "open <name>",
            about: "open a file and print its descriptor",
            arity: Arity::Exactly(1),
            needs_fs: true,
            run: Shell::<T>::open,
        },
        Command {
            name: "close",
            usage: "close <fd>",
            about: "close a descriptor",
            arity: Arity::Exactly(1),
            needs_fs: true,
            run: Shell::<T>::close,
        },
        Command {
            name: "seek",
            usage: "seek <fd> <offset>",
            about: "move the cursor of a descriptor",
            arity: Arity::Exactly(2),
            needs_fs: true,
            run: Shell::<T>::seek,
        },
        Command {
            name: "read",
            usage: "read <fd> <size>",
            about: "read up to <size> bytes at the cursor",
            arity: Arity::Exactly(2),
            needs_fs: true,
            run: Shell::<T>::read,
        },
        Command {
            name: "write",
            usage: "write <fd> <text...>",
            about: "write the rest of the line at the cursor",
            arity: Arity::AtLeast(2),
            needs_fs: true,
            run: Shell::<T>::write,
        },
        Command {
            name: "link",
            usage: "link <name> <new-name>",
            about: "add another name for a file",
            arity: Arity::Exactly(2),
            needs_fs: true,
            run: Shell::<T>::link,
        },
        Command {
            name: "unlink",
            usage: "unlink <name>",
            about: "remove a name",
            arity: Arity::Exactly(1),
            needs_fs: true,
            run: Shell::<T>::unlink,
        },
        Command {
            name: "truncate",
            usage: "truncate <name> <size>",
            about: "set the size of a file",
            arity: Arity::Exactly(2),
            needs_fs: true,
            run: Shell::<T>::truncate,
        },
    ]
}

/// Line oriented front end to a `Vfs`. Holds no filesystem logic of its own.
pub struct Shell<T: BlockStorage> {
    vfs: Vfs<T>,
    mounted: bool,
}

impl<T: BlockStorage> Shell<T> {
    pub fn new(dev: T) -> Self {
        Self {
            vfs: Vfs::new(FileSystem::new(dev)),
            mounted: false,
        }
    }

    /// Loads the filesystem already stored on the device.
    pub fn mount(&mut self) -> Result<(), SFSError> {
        self.vfs.load()?;
        self.mounted = true;
        Ok(())
    }

    pub fn format(&mut self, inodes: usize) -> Result<(), CommandError> {
        if inodes == 0 {
            return Err(CommandError::NoInodes);
        }
        self.vfs.mkfs(inodes)?;
        self.mounted = true;
        Ok(())
    }

    pub fn execute(&mut self, line: &str) -> Result<Outcome, CommandError> {
        let line = line.trim();
        let (name, rest) = match line.find(char::is_whitespace) {
            Some(end) => (&line[..end], &line[end..]),
            None => (line, ""),
        };
        let name = name.to_lowercase();
        match name.as_str() {
            "" => return Ok(Outcome::Print(String::new())),
            "exit" | "quit" => return Ok(Outcome::Exit),
            _ => (),
        }

        let table = commands::<T>();
        let command = table
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| CommandError::Unknown(name.clone()))?;

        let args = Args::new(rest);
        if !command.arity.accepts(args.words.len()) {
            return Err(CommandError::Usage(command.usage));
        }
        if command.needs_fs && !self.mounted {
            return Err(CommandError::NotMounted);
        }
        debug!("running {} with {:?}", command.name, args.words);
        (command.run)(self, &args).map(Outcome::Print)
    }

    /// Reads commands from `input` until it ends or `exit` is entered.
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, mut out: W) -> io::Result<()> {
        let mut lines = input.lines();
        loop {
            write!(out, "> ")?;
            out.flush()?;
            let line = match lines.next() {
                Some(line) => line?,
                None => break,
            };
            match self.execute(&line) {
                Ok(Outcome::Exit) => break,
                Ok(Outcome::Print(text)) if text.is_empty() => (),
                Ok(Outcome::Print(text)) => writeln!(out, "{}", text)?,
                Err(e) => writeln!(out, "error: {}", e)?,
            }
        }
        writeln!(out)
    }

    fn help(&mut self, _: &Args) -> Result<String, CommandError> {
        let mut text = String::from("commands:");
        for command in commands::<T>().iter() {
            text.push_str(&format!("\n  {:<24}{}", command.usage, command.about));
        }
        text.push_str(&format!("\n  {:<24}{}", "exit, quit", "leave the shell"));
        Ok(text)
    }

    fn mkfs(&mut self, args: &Args) -> Result<String, CommandError> {
        let inodes = args.number(0)?;
        self.format(inodes)?;
        Ok(format!("created filesystem with {} inodes", inodes))
    }

    fn stat(&mut self, args: &Args) -> Result<String, CommandError> {
        let name = args.word(0);
        let stat = self.vfs.stat(name)?;
        Ok(format!(
            "file: {}\n  inode: {}\n  type: {}\n  links: {}\n  size: {} bytes\n  blocks: {}",
            name, stat.inode, stat.kind, stat.links, stat.size, stat.blocks
        ))
    }

    fn ls(&mut self, _: &Args) -> Result<String, CommandError> {
        let listing = self.vfs.ls();
        if listing.is_empty() {
            return Ok("directory is empty".to_string());
        }
        let lines: Vec<String> = listing
            .iter()
            .map(|(name, inum)| format!("  {} -> inode {}", name, inum))
            .collect();
        Ok(lines.join("\n"))
    }

    fn create(&mut self, args: &Args) -> Result<String, CommandError> {
        let inum = self.vfs.create(args.word(0))?;
        Ok(format!("created {} (inode {})", args.word(0), inum))
    }

    fn open(&mut self, args: &Args) -> Result<String, CommandError> {
        let fd = self.vfs.open(args.word(0))?;
        Ok(format!("fd = {}", fd))
    }

    fn close(&mut self, args: &Args) -> Result<String, CommandError> {
        let fd = args.number(0)?;
        self.vfs.close(fd)?;
        Ok(format!("closed fd {}", fd))
    }

    fn seek(&mut self, args: &Args) -> Result<String, CommandError> {
        let fd = args.number(0)?;
        let pos = self.vfs.seek(fd, args.number(1)?)?;
        Ok(format!("fd {} at offset {}", fd, pos))
    }

    fn read(&mut self, args: &Args) -> Result<String, CommandError> {
        let data = self.vfs.read(args.number(0)?, args.number(1)?)?;
        let shown = match std::str::from_utf8(&data) {
            Ok(text) => format!("{:?}", text),
            Err(_) => format!("hex: {}", to_hex(&data)),
        };
        Ok(format!("read {} bytes: {}", data.len(), shown))
    }

    fn write(&mut self, args: &Args) -> Result<String, CommandError> {
        let written = self.vfs.write(args.number(0)?, args.tail(1).as_bytes())?;
        Ok(format!("wrote {} bytes", written))
    }

    fn link(&mut self, args: &Args) -> Result<String, CommandError> {
        self.vfs.link(args.word(0), args.word(1))?;
        Ok(format!("linked {} -> {}", args.word(1), args.word(0)))
    }

    fn unlink(&mut self, args: &Args) -> Result<String, CommandError> {
        self.vfs.unlink(args.word(0))?;
        Ok(format!("removed {}", args.word(0)))
    }

    fn truncate(&mut self, args: &Args) -> Result<String, CommandError> {
        let size = args.number(1)?;
        self.vfs.truncate(args.word(0), size)?;
        Ok(format!("{} is now {} bytes", args.word(0), size))
    }
}

fn to_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use simplefs::io::MemoryBlockEmulator;

    fn formatted_shell() -> Shell<MemoryBlockEmulator> {
        let mut shell = Shell::new(MemoryBlockEmulator::new(512, 64));
        shell.format(8).unwrap();
        shell
    }

    fn output(shell: &mut Shell<MemoryBlockEmulator>, line: &str) -> String {
        match shell.execute(line) {
            Ok(Outcome::Print(text)) => text,
            other => panic!("{:?} gave {:?}", line, other),
        }
    }

    #[test]
    fn help_lists_every_command() {
        let mut shell = Shell::new(MemoryBlockEmulator::new(512, 64));
        let help = output(&mut shell, "help");
        for command in commands::<MemoryBlockEmulator>().iter() {
            assert!(help.contains(command.usage), "missing {}", command.name);
        }
        assert!(help.contains("exit, quit"));
    }

    #[test]
    fn commands_need_a_filesystem() {
        let mut shell = Shell::new(MemoryBlockEmulator::new(512, 64));
        assert!(matches!(shell.execute("ls"), Err(CommandError::NotMounted)));
        assert!(matches!(
            shell.execute("create a"),
            Err(CommandError::NotMounted)
        ));
        // Unformatted memory devices hold no filesystem.
        assert!(shell.mount().is_err());

        assert_eq!(output(&mut shell, "mkfs 4"), "created filesystem with 4 inodes");
        assert_eq!(output(&mut shell, "ls"), "directory is empty");
    }

    #[test]
    fn mkfs_rejects_bad_counts() {
        let mut shell = Shell::new(MemoryBlockEmulator::new(512, 64));
        assert!(matches!(shell.execute("mkfs 0"), Err(CommandError::NoInodes)));
        assert!(matches!(
            shell.execute("mkfs -3"),
            Err(CommandError::BadNumber(_))
        ));
        assert!(matches!(shell.execute("mkfs"), Err(CommandError::Usage(_))));
    }

    #[test]
    fn mkfs_twice_reports_existing_store() {
        let mut shell = formatted_shell();
        assert!(matches!(
            shell.execute("mkfs 8"),
            Err(CommandError::Fs(SFSError::StoreExists))
        ));
    }

    #[test]
    fn wrong_arity_prints_usage() {
        let mut shell = formatted_shell();
        match shell.execute("seek 0") {
            Err(CommandError::Usage(usage)) => assert_eq!(usage, "seek <fd> <offset>"),
            other => panic!("expected usage, got {:?}", other),
        }
        assert!(matches!(shell.execute("ls extra"), Err(CommandError::Usage(_))));
        assert!(matches!(shell.execute("write 0"), Err(CommandError::Usage(_))));
    }

    #[test]
    fn unknown_and_blank_lines() {
        let mut shell = formatted_shell();
        assert!(matches!(
            shell.execute("format"),
            Err(CommandError::Unknown(_))
        ));
        assert_eq!(output(&mut shell, "   "), "");
        assert_eq!(shell.execute("exit").unwrap(), Outcome::Exit);
        assert_eq!(shell.execute("QUIT").unwrap(), Outcome::Exit);
    }

    #[test]
    fn write_seek_and_read_a_file() {
        let mut shell = formatted_shell();
        assert_eq!(output(&mut shell, "create notes"), "created notes (inode 0)");
        assert_eq!(output(&mut shell, "open notes"), "fd = 0");
        assert_eq!(
            output(&mut shell, "write 0 hello   spaced  world"),
            "wrote 21 bytes"
        );
        assert_eq!(output(&mut shell, "seek 0 0"), "fd 0 at offset 0");
        assert_eq!(
            output(&mut shell, "read 0 100"),
            "read 21 bytes: \"hello   spaced  world\""
        );
        assert_eq!(output(&mut shell, "seek 0 -5"), "fd 0 at offset 0");
        assert_eq!(output(&mut shell, "close 0"), "closed fd 0");
        assert!(matches!(
            shell.execute("read 0 1"),
            Err(CommandError::Fs(SFSError::BadDescriptor(0)))
        ));
    }

    #[test]
    fn read_shows_hex_for_binary_data() {
        let mut shell = formatted_shell();
        output(&mut shell, "create a");
        output(&mut shell, "open a");
        output(&mut shell, "write 0 é");
        output(&mut shell, "seek 0 1");
        assert_eq!(output(&mut shell, "read 0 1"), "read 1 bytes: hex: a9");
    }

    #[test]
    fn stat_link_unlink_and_truncate() {
        let mut shell = formatted_shell();
        output(&mut shell, "create a");
        assert_eq!(output(&mut shell, "link a b"), "linked b -> a");
        assert_eq!(output(&mut shell, "truncate b 700"), "b is now 700 bytes");
        assert_eq!(
            output(&mut shell, "stat a"),
            "file: a\n  inode: 0\n  type: file\n  links: 2\n  size: 700 bytes\n  blocks: 0"
        );
        assert_eq!(
            output(&mut shell, "ls"),
            "  a -> inode 0\n  b -> inode 0"
        );
        assert_eq!(output(&mut shell, "unlink a"), "removed a");
        assert!(matches!(
            shell.execute("stat a"),
            Err(CommandError::Fs(SFSError::DoesNotExist(_)))
        ));
        assert!(matches!(
            shell.execute("truncate b big"),
            Err(CommandError::BadNumber(_))
        ));
    }

    #[test]
    fn run_loop_prints_results_and_errors() {
        let mut shell = formatted_shell();
        let input = "create a\nopen missing\n\nls\nexit\nls\n";
        let mut out = Vec::new();
        shell.run(input.as_bytes(), &mut out).unwrap();

        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("> created a (inode 0)\n"));
        assert!(out.contains("> error: "));
        // The second ls comes after exit and never runs.
        assert_eq!(out.matches("a -> inode 0").count(), 1);
    }
}
