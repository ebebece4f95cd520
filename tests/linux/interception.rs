use std::ffi::CString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Barrier;
use std::time::Duration;

use hostfs::config::PreloadConfig;
use hostfs::linux_preload::RealSymbols;

use super::support::*;

const REMOTE_TEXT: &[u8] = b"hello from the remote side\n";

fn zeroed_stat() -> libc::stat {
    unsafe { std::mem::zeroed() }
}

#[test]
fn forced_namespace_file_behaves_like_a_local_file() {
    let tmp = tempfile::tempdir().unwrap();
    let server = FileServer::start(&[("data/hello.txt", REMOTE_TEXT)]);
    let state = state_for(&server, tmp.path());
    let real = RealSymbols::linked();
    let layer = state.interceptor(&real);

    unsafe {
        let fd = layer.open(c"/host/data/hello.txt".as_ptr(), libc::O_RDONLY, 0);
        assert!(fd >= 0, "open failed: errno {}", last_errno());

        let mut st = zeroed_stat();
        assert_eq!(layer.fstat(fd, &mut st), 0);
        assert_eq!(st.st_size as usize, REMOTE_TEXT.len());
        assert_eq!(st.st_mode & libc::S_IFMT, libc::S_IFREG);

        assert_eq!(libc::lseek(fd, 6, libc::SEEK_SET), 6);
        assert_eq!(read_fd(fd), &REMOTE_TEXT[6..]);
        assert_eq!(libc::lseek(fd, 0, libc::SEEK_SET), 0);
        assert_eq!(read_fd(fd), REMOTE_TEXT);
        assert_eq!(libc::close(fd), 0);

        let mut st = zeroed_stat();
        assert_eq!(layer.stat(c"/host/data/hello.txt".as_ptr(), &mut st), 0);
        assert_eq!(st.st_size as usize, REMOTE_TEXT.len());
        assert_eq!(layer.access(c"/host/data/hello.txt".as_ptr(), libc::R_OK), 0);
    }

    // Materialized once, then served from the cache.
    assert_eq!(server.fetches(), 1);
    let metrics = state.cache().metrics();
    assert_eq!(metrics.fetches, 1);
    assert!(metrics.hits >= 2);
}

#[test]
fn forced_namespace_key_is_canonicalized() {
    let tmp = tempfile::tempdir().unwrap();
    let server = FileServer::start(&[("data/hello.txt", REMOTE_TEXT)]);
    let state = state_for(&server, tmp.path());
    let real = RealSymbols::linked();
    let layer = state.interceptor(&real);

    unsafe {
        let fd = layer.open(c"/host/data/./sub/../hello.txt".as_ptr(), libc::O_RDONLY, 0);
        assert!(fd >= 0);
        assert_eq!(read_fd(fd), REMOTE_TEXT);
        libc::close(fd);

        assert_eq!(layer.open(c"/host/../etc/passwd".as_ptr(), libc::O_RDONLY, 0), -1);
        assert_eq!(last_errno(), libc::ENOENT);
    }
    assert_eq!(server.fetches(), 1);
}

#[test]
fn forced_namespace_missing_file_is_enoent() {
    let tmp = tempfile::tempdir().unwrap();
    let server = FileServer::start(&[]);
    let state = state_for(&server, tmp.path());
    let real = RealSymbols::linked();
    let layer = state.interceptor(&real);

    unsafe {
        assert_eq!(layer.open(c"/host/data/missing.txt".as_ptr(), libc::O_RDONLY, 0), -1);
        assert_eq!(last_errno(), libc::ENOENT);
        let mut st = zeroed_stat();
        assert_eq!(layer.stat(c"/host/data/missing.txt".as_ptr(), &mut st), -1);
        assert_eq!(last_errno(), libc::ENOENT);
    }
    // Absence is remembered.
    assert_eq!(server.fetches(), 1);
}

#[test]
fn local_hit_never_contacts_the_server() {
    let tmp = tempfile::tempdir().unwrap();
    let local = tmp.path().join("marker.txt");
    fs::write(&local, b"LOCAL marker").unwrap();
    let key = key_of(&local);
    let server = FileServer::start(&[(key.as_str(), b"REMOTE marker")]);
    let state = state_for(&server, &tmp.path().join("cache"));
    let real = RealSymbols::linked();
    let layer = state.interceptor(&real);
    let path = c_path(&local);

    unsafe {
        let fd = layer.open(path.as_ptr(), libc::O_RDONLY, 0);
        assert!(fd >= 0);
        assert_eq!(read_fd(fd), b"LOCAL marker");
        libc::close(fd);

        let mut st = zeroed_stat();
        assert_eq!(layer.stat(path.as_ptr(), &mut st), 0);
        assert_eq!(st.st_size, 12);
        assert_eq!(layer.access(path.as_ptr(), libc::F_OK), 0);
    }
    assert_eq!(server.fetches(), 0);
}

#[test]
fn local_absence_falls_back_to_the_server() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("remote_only.txt");
    let key = key_of(&missing);
    let server = FileServer::start(&[(key.as_str(), b"REMOTE marker")]);
    let state = state_for(&server, &tmp.path().join("cache"));
    let real = RealSymbols::linked();
    let layer = state.interceptor(&real);
    let path = c_path(&missing);

    unsafe {
        let fd = layer.open(path.as_ptr(), libc::O_RDONLY, 0);
        assert!(fd >= 0, "open failed: errno {}", last_errno());
        assert_eq!(read_fd(fd), b"REMOTE marker");
        libc::close(fd);

        let mut st = zeroed_stat();
        assert_eq!(layer.lstat(path.as_ptr(), &mut st), 0);
        assert_eq!(st.st_size, 13);

        let fd = layer.openat(libc::AT_FDCWD, path.as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC, 0);
        assert!(fd >= 0);
        libc::close(fd);
    }
    // The original path was never created locally.
    assert!(!missing.exists());
    assert_eq!(server.fetches(), 1);
}

#[test]
fn absent_everywhere_is_enoent_for_every_call() {
    let tmp = tempfile::tempdir().unwrap();
    let server = FileServer::start(&[]);
    let state = state_for(&server, &tmp.path().join("cache"));
    let real = RealSymbols::linked();
    let layer = state.interceptor(&real);
    let path = c_path(&tmp.path().join("nowhere.txt"));

    unsafe {
        assert_eq!(layer.open(path.as_ptr(), libc::O_RDONLY, 0), -1);
        assert_eq!(last_errno(), libc::ENOENT);

        let mut st = zeroed_stat();
        assert_eq!(layer.stat(path.as_ptr(), &mut st), -1);
        assert_eq!(last_errno(), libc::ENOENT);

        assert_eq!(layer.access(path.as_ptr(), libc::F_OK), -1);
        assert_eq!(last_errno(), libc::ENOENT);

        assert_eq!(layer.faccessat(libc::AT_FDCWD, path.as_ptr(), libc::R_OK, 0), -1);
        assert_eq!(last_errno(), libc::ENOENT);
    }
}

#[test]
fn non_absence_failures_propagate_without_fallback() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("plain.txt");
    fs::write(&file, b"x").unwrap();
    let below_file = file.join("child");
    let key = key_of(&below_file);
    let server = FileServer::start(&[(key.as_str(), b"REMOTE")]);
    let state = state_for(&server, &tmp.path().join("cache"));
    let real = RealSymbols::linked();
    let layer = state.interceptor(&real);
    let path = c_path(&below_file);

    unsafe {
        assert_eq!(layer.open(path.as_ptr(), libc::O_RDONLY, 0), -1);
        assert_eq!(last_errno(), libc::ENOTDIR);
        let mut st = zeroed_stat();
        assert_eq!(layer.stat(path.as_ptr(), &mut st), -1);
        assert_eq!(last_errno(), libc::ENOTDIR);
    }
    assert_eq!(server.fetches(), 0);
}

#[test]
fn write_intent_is_refused_inside_the_namespace_only() {
    let tmp = tempfile::tempdir().unwrap();
    let server = FileServer::start(&[("data/hello.txt", REMOTE_TEXT)]);
    let state = state_for(&server, &tmp.path().join("cache"));
    let real = RealSymbols::linked();
    let layer = state.interceptor(&real);

    unsafe {
        assert_eq!(layer.open(c"/host/data/hello.txt".as_ptr(), libc::O_WRONLY, 0), -1);
        assert_eq!(last_errno(), libc::EROFS);
        assert_eq!(
            layer.open(c"/host/data/new.txt".as_ptr(), libc::O_RDWR | libc::O_CREAT, 0o644),
            -1
        );
        assert_eq!(last_errno(), libc::EROFS);
        assert_eq!(server.fetches(), 0);

        assert_eq!(layer.access(c"/host/data/hello.txt".as_ptr(), libc::W_OK), -1);
        assert_eq!(last_errno(), libc::EROFS);

        let created = tmp.path().join("created.txt");
        let path = c_path(&created);
        let fd = layer.open(path.as_ptr(), libc::O_WRONLY | libc::O_CREAT, 0o644);
        assert!(fd >= 0);
        assert_eq!(libc::write(fd, b"abc".as_ptr().cast(), 3), 3);
        libc::close(fd);
        assert_eq!(fs::read(&created).unwrap(), b"abc");
    }
    // Only the W_OK check needed the remote file.
    assert_eq!(server.fetches(), 1);
}

#[test]
fn transport_failures_surface_as_eio() {
    let tmp = tempfile::tempdir().unwrap();
    let server = FileServer::with_behavior(&[("a.txt", b"x")], Behavior::Fail(libc::EACCES));
    let state = state_for(&server, &tmp.path().join("cache"));
    let real = RealSymbols::linked();
    let layer = state.interceptor(&real);

    unsafe {
        assert_eq!(layer.open(c"/host/a.txt".as_ptr(), libc::O_RDONLY, 0), -1);
        assert_eq!(last_errno(), libc::EIO);
        // Failed entries are retried on the next call.
        assert_eq!(layer.open(c"/host/a.txt".as_ptr(), libc::O_RDONLY, 0), -1);
        assert_eq!(last_errno(), libc::EIO);
    }
    assert_eq!(server.fetches(), 2);
    assert_eq!(state.cache().metrics().failures, 2);
}

#[test]
fn timeout_is_never_reported_as_absence() {
    let tmp = tempfile::tempdir().unwrap();
    let server = FileServer::with_behavior(&[("slow.txt", b"x")], Behavior::Stall);
    let state = state_with_timeout(&server, &tmp.path().join("cache"), Duration::from_millis(200));
    let real = RealSymbols::linked();
    let layer = state.interceptor(&real);

    unsafe {
        assert_eq!(layer.open(c"/host/slow.txt".as_ptr(), libc::O_RDONLY, 0), -1);
        assert_eq!(last_errno(), libc::EIO);
    }
}

#[test]
fn concurrent_first_opens_fetch_once() {
    const THREADS: usize = 16;
    let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
    let tmp = tempfile::tempdir().unwrap();
    let server = FileServer::with_behavior(&[("blob.bin", payload.as_slice())], Behavior::Delay(Duration::from_millis(150)));
    let state = state_for(&server, &tmp.path().join("cache"));
    let real = RealSymbols::linked();
    let barrier = Barrier::new(THREADS);

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let (state, real, barrier) = (&state, &real, &barrier);
                scope.spawn(move || {
                    let layer = state.interceptor(real);
                    barrier.wait();
                    unsafe {
                        let fd = layer.open(c"/host/blob.bin".as_ptr(), libc::O_RDONLY, 0);
                        assert!(fd >= 0);
                        let data = read_fd(fd);
                        libc::close(fd);
                        data
                    }
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), payload);
        }
    });

    assert_eq!(server.fetches(), 1);
    assert_eq!(state.cache().metrics().fetches, 1);
}

#[test]
fn ordinary_local_paths_match_native_calls() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("native.txt");
    fs::write(&file, b"native").unwrap();
    let server = FileServer::start(&[]);
    let state = state_for(&server, &tmp.path().join("cache"));
    let real = RealSymbols::linked();
    let layer = state.interceptor(&real);
    let path = c_path(&file);

    unsafe {
        let mut ours = zeroed_stat();
        let mut native = zeroed_stat();
        assert_eq!(layer.stat(path.as_ptr(), &mut ours), 0);
        assert_eq!(libc::stat(path.as_ptr(), &mut native), 0);
        assert_eq!(ours.st_ino, native.st_ino);
        assert_eq!(ours.st_dev, native.st_dev);
        assert_eq!(ours.st_size, native.st_size);
        assert_eq!(ours.st_mode, native.st_mode);

        let dir = c_path(tmp.path());
        let dirfd = libc::open(dir.as_ptr(), libc::O_RDONLY | libc::O_DIRECTORY);
        assert!(dirfd >= 0);
        let mut relative = zeroed_stat();
        assert_eq!(layer.fstatat(dirfd, c"native.txt".as_ptr(), &mut relative, 0), 0);
        assert_eq!(relative.st_ino, native.st_ino);
        // Relative to a directory descriptor: never routed remotely.
        assert_eq!(layer.fstatat(dirfd, c"absent.txt".as_ptr(), &mut relative, 0), -1);
        assert_eq!(last_errno(), libc::ENOENT);
        libc::close(dirfd);

        let raw = CString::new(b"/tmp/hostfs-\xff\xfe-absent".to_vec()).unwrap();
        assert_eq!(layer.open(raw.as_ptr(), libc::O_RDONLY, 0), -1);
        assert_eq!(last_errno(), libc::ENOENT);
    }
    assert_eq!(server.fetches(), 0);
}

#[test]
fn passthrough_interceptor_forwards_everything() {
    let real = RealSymbols::linked();
    let layer = hostfs::linux_preload::Interceptor::passthrough(&real);
    unsafe {
        assert_eq!(layer.open(c"/host/anything".as_ptr(), libc::O_RDONLY, 0), -1);
        assert_eq!(last_errno(), libc::ENOENT);
        let mut st = zeroed_stat();
        assert_eq!(layer.stat(c"/".as_ptr(), &mut st), 0);
    }
}

#[test]
fn paths_inside_the_cache_dir_are_never_fetched() {
    let tmp = tempfile::tempdir().unwrap();
    let cache_root = tmp.path().join("cache");
    let cache_dir = PreloadConfig {
        cache_root: cache_root.clone(),
        ..PreloadConfig::default()
    }
    .cache_dir();
    let ghost = cache_dir.join("ghost.txt");
    let ghost_key = key_of(&ghost);
    let server = FileServer::start(&[("data/hello.txt", REMOTE_TEXT), (ghost_key.as_str(), b"REMOTE ghost")]);
    let state = state_for(&server, &cache_root);
    assert_eq!(state.cache().dir(), cache_dir.as_path());
    let real = RealSymbols::linked();
    let layer = state.interceptor(&real);

    unsafe {
        let fd = layer.open(c"/host/data/hello.txt".as_ptr(), libc::O_RDONLY, 0);
        assert!(fd >= 0);
        libc::close(fd);
    }
    assert_eq!(server.fetches(), 1);

    let artifact = fs::read_dir(&cache_dir).unwrap().next().unwrap().unwrap().path();
    let artifact = c_path(&artifact);
    let ghost = c_path(&ghost);
    unsafe {
        let fd = layer.open(artifact.as_ptr(), libc::O_RDONLY, 0);
        assert!(fd >= 0);
        assert_eq!(read_fd(fd), REMOTE_TEXT);
        libc::close(fd);

        assert_eq!(layer.open(ghost.as_ptr(), libc::O_RDONLY, 0), -1);
        assert_eq!(last_errno(), libc::ENOENT);
        let mut st = zeroed_stat();
        assert_eq!(layer.stat(ghost.as_ptr(), &mut st), -1);
        assert_eq!(last_errno(), libc::ENOENT);
        assert_eq!(layer.access(ghost.as_ptr(), libc::F_OK), -1);
        assert_eq!(last_errno(), libc::ENOENT);
    }
    assert_eq!(server.fetches(), 1);
}

/// `path` spelled relative to the working directory, which is left alone.
fn relative_to_cwd(path: &Path) -> PathBuf {
    let cwd = std::env::current_dir().unwrap();
    let mut relative = PathBuf::new();
    for _ in cwd.components().skip(1) {
        relative.push("..");
    }
    relative.join(path.strip_prefix("/").unwrap())
}

#[test]
fn relative_paths_fall_back_under_their_literal_key() {
    let tmp = tempfile::tempdir().unwrap();
    let present = tmp.path().join("present.txt");
    fs::write(&present, b"LOCAL relative").unwrap();
    let present = relative_to_cwd(&present);
    let absent = relative_to_cwd(&tmp.path().join("absent.txt"));
    assert!(absent.is_relative());
    let absent_key = key_of(&absent);
    let server = FileServer::start(&[(absent_key.as_str(), b"REMOTE relative")]);
    let state = state_for(&server, &tmp.path().join("cache"));
    let real = RealSymbols::linked();
    let layer = state.interceptor(&real);
    let present = c_path(&present);
    let absent = c_path(&absent);

    unsafe {
        let fd = layer.open(present.as_ptr(), libc::O_RDONLY, 0);
        assert!(fd >= 0, "open failed: errno {}", last_errno());
        assert_eq!(read_fd(fd), b"LOCAL relative");
        libc::close(fd);
        assert_eq!(server.fetches(), 0);

        let fd = layer.open(absent.as_ptr(), libc::O_RDONLY, 0);
        assert!(fd >= 0, "open failed: errno {}", last_errno());
        assert_eq!(read_fd(fd), b"REMOTE relative");
        libc::close(fd);

        let mut st = zeroed_stat();
        assert_eq!(layer.stat(absent.as_ptr(), &mut st), 0);
        assert_eq!(st.st_size, 15);
    }
    assert_eq!(server.fetches(), 1);
    assert!(!tmp.path().join("absent.txt").exists());
}
