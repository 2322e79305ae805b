use simplefs::io::FileBlockEmulatorBuilder;
use simplefs::{FileSystem, Vfs};

pub fn main() {
    let dir = tempfile::tempdir().unwrap();
    let dev = FileBlockEmulatorBuilder::from(dir.path().join("storage.bin"))
        .with_block_count(64)
        .build();

    // create a new simple fs on device and write a file
    let mut vfs = Vfs::new(FileSystem::new(dev));
    vfs.mkfs(16).expect("should create");
    vfs.create("hello.txt").unwrap();
    let fd = vfs.open("hello.txt").unwrap();
    vfs.write(fd, b"hello, block device").unwrap();
    vfs.seek(fd, 0).unwrap();

    let data = vfs.read(fd, 64).unwrap();
    println!("{}", String::from_utf8_lossy(&data));
    println!("{:?}", vfs.stat("hello.txt").unwrap());
}
