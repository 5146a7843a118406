//! End-to-end scenarios across several subsystems.

use reliquary_fs::{
    Errno, FsBuilder, FsConfig, MemFs, MountOptions, OpenFlags, Whence, WriteFileOptions,
};

fn flags(token: &str) -> OpenFlags {
    OpenFlags::from_mode_str(token).unwrap()
}

/// Create a log file, write it, read it back, list its directory
#[test]
fn test_var_log_scenario() {
    let mut fs = MemFs::new();
    fs.mkdir_tree("/var/log", 0o777).unwrap();

    let fd = fs.open("/var/log/app.log", flags("w"), None).unwrap();
    assert_eq!(fs.write(fd, b"hello", None).unwrap(), 5);
    fs.close(fd).unwrap();

    let fd = fs.open("/var/log/app.log", flags("r"), None).unwrap();
    let mut buf = [0u8; 5];
    assert_eq!(fs.read(fd, &mut buf, None).unwrap(), 5);
    assert_eq!(&buf, b"hello");
    fs.close(fd).unwrap();

    assert_eq!(fs.readdir("/var/log").unwrap(), vec![".", "..", "app.log"]);
}

/// Appending log writers interleave at end of file
#[test]
fn test_two_appenders() {
    let mut fs = MemFs::new();
    let a = fs.open("/journal", flags("a"), None).unwrap();
    let b = fs.open("/journal", flags("a+"), None).unwrap();

    fs.write(a, b"[a1]", None).unwrap();
    fs.write(b, b"[b1]", None).unwrap();
    fs.write(a, b"[a2]", None).unwrap();

    fs.llseek(b, 0, Whence::Set).unwrap();
    let mut buf = [0u8; 12];
    assert_eq!(fs.read(b, &mut buf, None).unwrap(), 12);
    assert_eq!(&buf, b"[a1][b1][a2]");
}

/// A mounted tree hides the covered directory until unmounted
#[test]
fn test_mount_lifecycle() {
    let mut fs = FsBuilder::new()
        .add_file("/mnt/data/underneath", "covered", 0o644)
        .build()
        .unwrap();

    fs.mount("/mnt/data", &MountOptions::default()).unwrap();
    assert!(!fs.exists("/mnt/data/underneath"));
    assert_eq!(fs.readdir("/mnt/data").unwrap(), vec![".", ".."]);

    fs.write_file("/mnt/data/fresh", "new", &WriteFileOptions::default()).unwrap();
    let fd = fs.open("/mnt/data/fresh", flags("r"), None).unwrap();
    assert_eq!(fs.stream(fd).unwrap().path(), "/mnt/data/fresh");
    assert_eq!(fs.unmount("/mnt/data").unwrap_err().errno(), Errno::EBUSY);
    fs.close(fd).unwrap();

    fs.unmount("/mnt/data").unwrap();
    assert!(!fs.exists("/mnt/data/fresh"));
    assert_eq!(fs.read_file("/mnt/data/underneath").unwrap(), b"covered");
}

/// Configuration loaded from TOML shapes the filesystem
#[test]
fn test_toml_configured_filesystem() {
    let config = FsConfig::from_toml_str(
        r#"
        case_insensitive = true
        cwd = "/Users/Guest"
        max_open_fds = 8
        "#,
    )
    .unwrap();

    let mut fs = FsBuilder::new()
        .config(config)
        .add_file("Desktop.ini", "[.ShellClassInfo]", 0o644)
        .build()
        .unwrap();

    assert_eq!(fs.cwd(), "/Users/Guest");
    assert!(fs.exists("/users/guest/DESKTOP.INI"));

    for _ in 0..8 {
        fs.open("desktop.ini", flags("r"), None).unwrap();
    }
    assert_eq!(fs.open("desktop.ini", flags("r"), None).unwrap_err().errno(), Errno::EMFILE);
}

/// Stat reflects writes, truncation and permission changes
#[test]
fn test_stat_tracks_changes() {
    let mut fs = MemFs::new();
    let fd = fs.open("/report.csv", flags("w+"), Some(0o600)).unwrap();
    fs.write(fd, &[b'x'; 5000], None).unwrap();

    let stat = fs.fstat(fd).unwrap();
    assert_eq!(stat.size, 5000);
    assert_eq!(stat.blocks, 2);
    assert_eq!(stat.mode & 0o777, 0o600);

    fs.ftruncate(fd, 100).unwrap();
    fs.chmod("/report.csv", 0o644).unwrap();
    let stat = fs.stat("/report.csv").unwrap();
    assert_eq!(stat.size, 100);
    assert_eq!(stat.blocks, 1);
    assert_eq!(stat.mode & 0o777, 0o644);
}

/// Removing an open file keeps its data until the last close
#[test]
fn test_unlinked_file_survives_open_streams() {
    let mut fs = MemFs::new();
    let writer = fs.open("/scratch", flags("w"), None).unwrap();
    let reader = fs.open("/scratch", flags("r"), None).unwrap();
    let node = fs.stream(writer).unwrap().node();

    fs.unlink("/scratch").unwrap();
    fs.write(writer, b"ghost", None).unwrap();
    fs.close(writer).unwrap();
    assert!(fs.node(node).is_some());

    let mut buf = [0u8; 5];
    assert_eq!(fs.read(reader, &mut buf, None).unwrap(), 5);
    assert_eq!(&buf, b"ghost");
    fs.close(reader).unwrap();

    assert!(fs.node(node).is_none());
    assert!(fs.create("/scratch", 0o644).is_ok());
}
