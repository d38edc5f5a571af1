use std::ffi::OsStr;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::mem::MaybeUninit;
use std::num::NonZeroU64;
use std::path::Path;
use std::sync::Mutex;

use clap::Parser;

use breadbox_core::{Filesystem, BLOCK_SIZE};
use breadbox_net::Server;
use breadbox_traits::{BlockAccess, BlockIndex};

#[derive(Debug, clap::Parser)]
#[command(name = "breadbox", args_conflicts_with_subcommands = true)]
struct Args {
    /// Listening port. Omitted or 0 lets the OS choose; the chosen port is
    /// printed on startup either way.
    port: Option<u16>,

    /// Backing disk image.
    #[arg(long, short, default_value = OsStr::new("fs.img"))]
    image: Box<Path>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Create (if needed) and format a disk image, then exit.
    Format {
        #[arg(long, short, default_value = OsStr::new("fs.img"))]
        image: Box<Path>,

        /// Device size in blocks.
        #[arg(long, short, default_value_t = NonZeroU64::new(1024).unwrap())]
        blocks: NonZeroU64,
    },
}

/// Block device over a plain file, one syscall pair per block.
struct FileDevice {
    file: Mutex<File>,
    block_count: BlockIndex,
}

impl FileDevice {
    fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<FileDevice> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let len = file.metadata()?.len();
        if len % BLOCK_SIZE as u64 != 0 {
            anyhow::bail!("image length is not a multiple of the block size");
        }

        Ok(FileDevice {
            file: Mutex::new(file),
            block_count: BlockIndex(len / BLOCK_SIZE as u64),
        })
    }

    fn create<P: AsRef<Path>>(path: P, blocks: NonZeroU64) -> anyhow::Result<FileDevice> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;
        file.set_len(blocks.get() * BLOCK_SIZE as u64)?;

        Ok(FileDevice {
            file: Mutex::new(file),
            block_count: BlockIndex(blocks.get()),
        })
    }

    fn seek(file: &mut File, position: BlockIndex) -> Result<(), breadbox_traits::Error> {
        file.seek(SeekFrom::Start(position.0 * BLOCK_SIZE as u64))
            .map_err(|_| breadbox_traits::Error::IO)?;

        Ok(())
    }
}

unsafe impl BlockAccess<BLOCK_SIZE> for FileDevice {
    fn read(
        &self,
        block_idx: BlockIndex,
        buffer: &mut MaybeUninit<[u8; BLOCK_SIZE]>,
    ) -> Result<(), breadbox_traits::Error> {
        let mut file = self.file.lock().unwrap();
        Self::seek(&mut file, block_idx)?;

        *buffer = MaybeUninit::zeroed();
        let buffer = unsafe { buffer.assume_init_mut() };

        file.read_exact(buffer.as_mut_slice())
            .map_err(|_| breadbox_traits::Error::IO)?;

        Ok(())
    }

    fn write(
        &self,
        block_idx: BlockIndex,
        buffer: &[u8; BLOCK_SIZE],
    ) -> Result<(), breadbox_traits::Error> {
        let mut file = self.file.lock().unwrap();
        Self::seek(&mut file, block_idx)?;
        file.write_all(buffer.as_slice())
            .map_err(|_| breadbox_traits::Error::IO)?;

        Ok(())
    }

    fn device_size(&self) -> Result<BlockIndex, breadbox_traits::Error> {
        Ok(self.block_count)
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Some(Command::Format { image, blocks }) => {
            let device = FileDevice::create(&image, blocks)?;
            Filesystem::format(&device)?;
            log::info!("formatted {image:?}: {blocks} blocks");
            Ok(())
        }
        None => {
            let device = FileDevice::open(&args.image)?;
            let fs = Filesystem::mount(device)?;
            let server = Server::bind(fs, args.port.unwrap_or(0))?;
            println!("{}", server.port());
            server.run()
        }
    }
}
