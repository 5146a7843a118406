//! Integration tests for resolution, creation and the stream data path.
//!
//! Each test drives the public `MemFs` API only.

use reliquary_fs::path::normalize;
use reliquary_fs::{
    Errno, FsBuilder, LookupOptions, MemFs, NodeId, NodeKind, OpenFlags, WriteFileOptions,
};
use std::collections::HashSet;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn flags(token: &str) -> OpenFlags {
    OpenFlags::from_mode_str(token).unwrap()
}

/// Normalizing twice gives the same result as normalizing once
#[test]
fn test_normalize_is_idempotent() {
    for path in [
        "/",
        "/a/b/c",
        "/a//b/./c/",
        "/a/b/../../..",
        "/../x",
        "/a/./b/../c/./d//",
        "/...",
    ] {
        let once = normalize(path);
        assert_eq!(normalize(&once), once, "path {path}");
    }
}

/// A created node reconstructs its own path
#[test]
fn test_get_path_round_trip() {
    init_tracing();
    let mut fs = MemFs::new();
    fs.mkdir("/a", 0o755).unwrap();
    let id = fs.mkdir("/a/b", 0o755).unwrap();

    let lookup = fs.lookup_path("/a/b", LookupOptions::default()).unwrap();
    assert_eq!(lookup.node, Some(id));
    assert_eq!(fs.get_path(id).unwrap(), "/a/b");
}

/// mknod on a taken name fails and leaves the existing node untouched
#[test]
fn test_mknod_collision_preserves_existing() {
    let mut fs = FsBuilder::new()
        .add_file("/data", "payload", 0o640)
        .build()
        .unwrap();
    let before = fs.stat("/data").unwrap();

    for result in [
        fs.mkdir("/data", 0o777),
        fs.create("/data", 0o600),
        fs.mkdev("/data", 0o666, 1),
        fs.symlink("/elsewhere", "/data"),
    ] {
        assert_eq!(result.unwrap_err().errno(), Errno::EEXIST);
    }

    assert_eq!(fs.stat("/data").unwrap(), before);
    assert_eq!(fs.read_file("/data").unwrap(), b"payload");
}

/// mkdir_tree is repeatable and creates exactly one node per segment
#[test]
fn test_mkdir_tree_twice() {
    let mut fs = MemFs::new();
    fs.mkdir_tree("/x/y/z", 0o755).unwrap();
    let indexed = fs.index().len();
    fs.mkdir_tree("/x/y/z", 0o755).unwrap();

    assert_eq!(fs.index().len(), indexed);
    assert_eq!(indexed, 3);
    assert_eq!(fs.readdir("/").unwrap(), vec![".", "..", "x"]);
    assert_eq!(fs.readdir("/x").unwrap(), vec![".", "..", "y"]);
    assert_eq!(fs.readdir("/x/y").unwrap(), vec![".", "..", "z"]);
}

/// mkdir_tree stops at a non-directory in the way
#[test]
fn test_mkdir_tree_through_file() {
    let mut fs = MemFs::new();
    fs.create("/x", 0o644).unwrap();
    assert!(fs.mkdir_tree("/x/y", 0o755).is_err());
}

/// Bytes written at position 0 read back unchanged
#[test]
fn test_write_read_round_trip() {
    let mut fs = MemFs::new();
    let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();

    let fd = fs.open("/blob", flags("w+"), None).unwrap();
    assert_eq!(fs.write(fd, &data, Some(0)).unwrap(), data.len());

    let mut back = vec![0u8; data.len()];
    assert_eq!(fs.read(fd, &mut back, Some(0)).unwrap(), data.len());
    assert_eq!(back, data);
}

/// Writing past the end zero-fills the gap
#[test]
fn test_sparse_write_zero_fills() {
    let mut fs = MemFs::new();
    let fd = fs.open("/sparse", flags("w+"), None).unwrap();
    fs.write(fd, b"ab", Some(0)).unwrap();
    fs.write(fd, b"yz", Some(10)).unwrap();

    let mut buf = [0xFFu8; 12];
    assert_eq!(fs.read(fd, &mut buf, Some(0)).unwrap(), 12);
    assert_eq!(&buf[..2], b"ab");
    assert!(buf[2..10].iter().all(|&b| b == 0));
    assert_eq!(&buf[10..], b"yz");
}

/// Truncation discards the tail for good
#[test]
fn test_truncate_then_read_past_end() {
    let mut fs = MemFs::new();
    let fd = fs.open("/t", flags("w+"), None).unwrap();
    fs.write(fd, b"0123456789", None).unwrap();

    fs.truncate("/t", 4).unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(fs.read(fd, &mut buf, Some(4)).unwrap(), 0);
    assert_eq!(fs.read(fd, &mut buf, Some(8)).unwrap(), 0);

    fs.truncate("/t", 8).unwrap();
    assert_eq!(fs.read(fd, &mut buf, Some(0)).unwrap(), 8);
    assert_eq!(&buf, b"0123\0\0\0\0");
}

/// O_CREAT | O_EXCL on an existing path fails and creates nothing
#[test]
fn test_exclusive_create_on_existing() {
    let mut fs = FsBuilder::new().add_dir("/d", 0o755).add_file("/d/f", "", 0o644).build().unwrap();
    let indexed = fs.index().len();

    for path in ["/d", "/d/f"] {
        let err = fs.open(path, OpenFlags::CREAT | OpenFlags::EXCL | OpenFlags::WRONLY, None);
        assert_eq!(err.unwrap_err().errno(), Errno::EEXIST);
    }

    assert_eq!(fs.index().len(), indexed);
    assert_eq!(fs.readdir("/d").unwrap().len(), 3);
    assert_eq!(fs.open_count(), 0);
}

fn symlink_chain(links: usize) -> MemFs {
    let mut fs = MemFs::new();
    fs.write_file("/target", &b"end"[..], &WriteFileOptions::default()).unwrap();
    fs.symlink("/target", "/link0").unwrap();
    for i in 1..links {
        fs.symlink(&format!("link{}", i - 1), &format!("/link{i}")).unwrap();
    }
    fs
}

/// Forty hops resolve, forty-one do not
#[test]
fn test_symlink_hop_limit() {
    let mut ok = symlink_chain(40);
    assert_eq!(ok.read_file("/link39").unwrap(), b"end");

    let too_long = symlink_chain(41);
    let err = too_long.lookup_path("/link40", LookupOptions::follow()).unwrap_err();
    assert_eq!(err.errno(), Errno::ELOOP);
    assert!(err.is_loop());

    // The final link itself is still reachable without following it.
    let link = too_long.lookup_path("/link40", LookupOptions::default()).unwrap();
    assert!(matches!(
        too_long.node(link.node.unwrap()).unwrap().kind(),
        NodeKind::Symlink { .. }
    ));
}

/// Relative symlink targets resolve against the link's directory
#[test]
fn test_relative_symlink_target() {
    let mut fs = FsBuilder::new()
        .add_file("/srv/app/config.toml", "k = 1", 0o644)
        .add_symlink("app/config.toml", "/srv/current")
        .add_symlink("../srv/app", "/etc/app")
        .build()
        .unwrap();

    assert_eq!(fs.read_file("/srv/current").unwrap(), b"k = 1");
    assert_eq!(fs.read_file("/etc/app/config.toml").unwrap(), b"k = 1");
    assert_eq!(
        fs.lookup_path("/etc/app/config.toml", LookupOptions::default())
            .unwrap()
            .path,
        "/srv/app/config.toml"
    );
}

/// Live descriptors are unique and closed ones come back
#[test]
fn test_descriptor_reuse() {
    let mut fs = FsBuilder::new().add_file("/f", "x", 0o644).build().unwrap();

    let fds: Vec<_> = (0..64).map(|_| fs.open("/f", flags("r"), None).unwrap()).collect();
    let unique: HashSet<_> = fds.iter().copied().collect();
    assert_eq!(unique.len(), fds.len());

    fs.close(fds[17]).unwrap();
    let reopened = fs.open("/f", flags("r"), None).unwrap();
    assert_eq!(reopened, fds[17]);
    assert_eq!(fs.open_count(), 64);
}

/// Opening past the descriptor limit fails with EMFILE
#[test]
fn test_descriptor_exhaustion() {
    let mut fs = MemFs::with_config(&reliquary_fs::FsConfig {
        max_open_fds: 3,
        ..reliquary_fs::FsConfig::default()
    })
    .unwrap();
    fs.create("/f", 0o644).unwrap();

    for _ in 0..3 {
        fs.open("/f", flags("r"), None).unwrap();
    }
    assert_eq!(fs.open("/f", flags("r"), None).unwrap_err().errno(), Errno::EMFILE);
}

/// Every live node is indexed under its parent and name
#[test]
fn test_index_matches_directory_contents() {
    let mut fs = FsBuilder::new()
        .add_dir("/a/b", 0o755)
        .add_file("/a/f1", "1", 0o644)
        .add_file("/a/b/f2", "2", 0o644)
        .add_symlink("/a", "/l")
        .build()
        .unwrap();
    fs.unlink("/a/f1").unwrap();
    assert!(fs.rmdir("/a/b").is_err());
    fs.unlink("/a/b/f2").unwrap();
    fs.rmdir("/a/b").unwrap();

    let mut live = 0;
    let mut pending = vec![NodeId::ROOT];
    while let Some(id) = pending.pop() {
        if let NodeKind::Directory { contents, .. } = fs.node(id).unwrap().kind() {
            for (name, &child) in contents {
                assert_eq!(fs.index().lookup(id, name), Some(child));
                assert_eq!(fs.node(child).unwrap().parent(), id);
                live += 1;
                pending.push(child);
            }
        }
    }
    assert_eq!(live, fs.index().len());
    assert_eq!(live, 2);
}
