//! End-to-end transfers over a localhost socket pair: a real receiver
//! worker on one thread, a real sender connection on the other.

use std::fs;
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use fling::compress::CompressionPolicy;
use fling::connection::Connection;
use fling::listing::FileListing;
use fling::logger::NoopLogger;
use fling::receiver;
use fling::sender::Sender;

/// Runs one complete transfer of `paths` and returns the destination
/// directory the receiver rebuilt them under.
fn transfer(paths: &[&Path], compress: bool) -> TempDir {
    let destination = TempDir::new().expect("destination dir");
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let address = listener.local_addr().expect("address");

    let destination_path = destination.path().to_path_buf();
    let server = thread::spawn(move || {
        let (stream, peer) = listener.accept().expect("accept");
        receiver::serve_connection(
            stream,
            peer.to_string(),
            destination_path,
            Arc::new(NoopLogger),
        );
    });

    let mut listing = FileListing::new();
    for path in paths {
        listing.add(path).expect("listable path");
    }
    let entries = listing.finalize().expect("non-empty listing");

    let stream = TcpStream::connect(address).expect("connect");
    let sender = Sender::new(
        entries,
        CompressionPolicy::new(compress),
        false,
        Arc::new(NoopLogger),
    )
    .expect("sender");

    let mut connection = Connection::new(stream, sender);
    connection.with_link(|sender, link| sender.start(link));
    connection.run();
    assert!(connection.handler.finished(), "sender did not finish cleanly");

    // Closing the socket lets the receiver observe an orderly disconnect.
    drop(connection);
    server.join().expect("receiver worker");

    destination
}

#[test]
fn empty_file() {
    let source = TempDir::new().unwrap();
    let file = source.path().join("a.bin");
    fs::write(&file, b"").unwrap();

    let destination = transfer(&[&file], false);

    let received = destination.path().join("a.bin");
    assert_eq!(fs::metadata(&received).unwrap().len(), 0);
}

#[test]
fn three_byte_file() {
    let source = TempDir::new().unwrap();
    let file = source.path().join("x");
    fs::write(&file, [0x01, 0x02, 0x03]).unwrap();

    let destination = transfer(&[&file], false);

    assert_eq!(
        fs::read(destination.path().join("x")).unwrap(),
        [0x01, 0x02, 0x03]
    );
}

#[test]
fn directory_tree() {
    let source = TempDir::new().unwrap();
    let root = source.path().join("dir");
    fs::create_dir_all(root.join("sub")).unwrap();
    fs::write(root.join("sub/f.txt"), b"hi").unwrap();

    let destination = transfer(&[&root], false);

    assert!(destination.path().join("dir").is_dir());
    assert!(destination.path().join("dir/sub").is_dir());
    assert_eq!(
        fs::read(destination.path().join("dir/sub/f.txt")).unwrap(),
        b"hi"
    );
}

#[test]
fn multi_chunk_file() {
    // Larger than two read blocks so the upload spans several FileChunk
    // packets.
    let content: Vec<u8> = (0..300_000u32).map(|i| (i * 31 % 251) as u8).collect();

    let source = TempDir::new().unwrap();
    let file = source.path().join("big.dat");
    fs::write(&file, &content).unwrap();

    let destination = transfer(&[&file], false);

    assert_eq!(fs::read(destination.path().join("big.dat")).unwrap(), content);
}

#[test]
fn compressed_file_round_trips() {
    let content = b"a highly repetitive line of text\n".repeat(8_000);

    let source = TempDir::new().unwrap();
    let file = source.path().join("data.txt");
    fs::write(&file, &content).unwrap();

    let destination = transfer(&[&file], true);

    assert_eq!(
        fs::read(destination.path().join("data.txt")).unwrap(),
        content
    );
}

#[test]
fn compression_policy_still_verifies_small_files() {
    // Below the compression threshold: sent raw even with --compress.
    let source = TempDir::new().unwrap();
    let file = source.path().join("tiny.txt");
    fs::write(&file, b"tiny").unwrap();

    let destination = transfer(&[&file], true);

    assert_eq!(fs::read(destination.path().join("tiny.txt")).unwrap(), b"tiny");
}

#[test]
fn multiple_arguments_in_one_connection() {
    let source = TempDir::new().unwrap();
    let one = source.path().join("one.bin");
    let tree = source.path().join("tree");
    fs::write(&one, b"first").unwrap();
    fs::create_dir(&tree).unwrap();
    fs::write(tree.join("two.bin"), b"second").unwrap();

    let destination = transfer(&[&one, &tree], false);

    assert_eq!(fs::read(destination.path().join("one.bin")).unwrap(), b"first");
    assert_eq!(
        fs::read(destination.path().join("tree/two.bin")).unwrap(),
        b"second"
    );
}
