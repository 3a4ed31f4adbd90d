fn main() {
    println!("Run `cargo test -p streamfile-e2e` to execute the end-to-end scenarios.");
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use streamfile_protocol::wire::{read_message, write_message};
    use streamfile_protocol::{
        Chunk, Code, DownloadRequest, Headers, MAX_CHUNK_SIZE, Method, ServiceInfo, WireMessage,
    };
    use streamfile_rpc::{RpcClient, RpcServer, RpcServerConfig};
    use streamfile_transfer::digest::{digest_bytes, file_digest};
    use streamfile_transfer::{
        DirectoryHooks, FileTransferService, TransferClient, TransferError, TransferOptions,
    };
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};

    /// A running server storing files below its own temp directory.
    struct Harness {
        server: Arc<RpcServer<DirectoryHooks>>,
        addr: SocketAddr,
        store: TempDir,
    }

    impl Harness {
        async fn start() -> Self {
            let store = TempDir::new().unwrap();
            let info = ServiceInfo {
                name: "e2e".into(),
                description: "end-to-end".into(),
                version: "0.0.0".into(),
            };
            let service = FileTransferService::new(DirectoryHooks::new(store.path()), info);
            let server = RpcServer::new(
                RpcServerConfig {
                    addr: ([127, 0, 0, 1], 0).into(),
                },
                service,
            );
            let listener = server.listen().await.unwrap();
            let addr = listener.local_addr().unwrap();
            let serving = Arc::clone(&server);
            tokio::spawn(async move { serving.serve(listener).await });
            Self {
                server,
                addr,
                store,
            }
        }

        fn client(&self) -> TransferClient<RpcClient> {
            TransferClient::new(RpcClient::new(self.addr))
        }

        fn stored(&self, identifier: &str) -> PathBuf {
            self.store.path().join(identifier)
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.server.shutdown();
        }
    }

    fn write_source(dir: &Path, name: &str, len: usize) -> (PathBuf, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i * 7 % 256) as u8).collect();
        let path = dir.join(name);
        std::fs::write(&path, &data).unwrap();
        (path, data)
    }

    async fn send(stream: &mut TcpStream, msg: WireMessage) {
        write_message(stream, &msg).await.unwrap();
        stream.flush().await.unwrap();
    }

    #[tokio::test]
    async fn ten_mib_upload_and_download_with_verification() {
        let harness = Harness::start().await;
        let local = TempDir::new().unwrap();
        let (src, data) = write_source(local.path(), "source.bin", 10 * 1024 * 1024);
        let expected = digest_bytes(&data);
        let opts = TransferOptions::new().verify(true);

        let uploaded = harness.client().upload("tok-1", &src, &opts).await.unwrap();
        assert_eq!(uploaded.digest.as_deref(), Some(expected.as_str()));
        assert_eq!(file_digest(&harness.stored("tok-1")).await.unwrap(), expected);

        let dest = local.path().join("restored.bin");
        let downloaded = harness.client().download("tok-1", &dest, &opts).await.unwrap();
        assert_eq!(downloaded.digest.as_deref(), Some(expected.as_str()));
        assert_eq!(file_digest(&dest).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn rejected_download_leaves_no_local_file() {
        let harness = Harness::start().await;
        let local = TempDir::new().unwrap();
        let dest = local.path().join("abc.bin");

        let err = harness
            .client()
            .download("abc", &dest, &TransferOptions::new().verify(true))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(Code::FailedPrecondition));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn parallel_uploads_of_distinct_identifiers() {
        let harness = Harness::start().await;
        let local = TempDir::new().unwrap();
        let opts = TransferOptions::new().verify(true).chunk_size(128 * 1024);
        let sources: Vec<_> = (0..4)
            .map(|i| write_source(local.path(), &format!("src-{i}.bin"), 700_000 + i * 1000))
            .collect();

        let client = harness.client();
        let (a, b, c, d) = tokio::join!(
            client.upload("batch/0", &sources[0].0, &opts),
            client.upload("batch/1", &sources[1].0, &opts),
            client.upload("batch/2", &sources[2].0, &opts),
            client.upload("batch/3", &sources[3].0, &opts),
        );
        for (i, result) in [a, b, c, d].into_iter().enumerate() {
            let outcome = result.unwrap();
            assert_eq!(outcome.digest, Some(digest_bytes(&sources[i].1)));
            let stored = std::fs::read(harness.stored(&format!("batch/{i}"))).unwrap();
            assert_eq!(stored, sources[i].1);
        }
        assert_eq!(harness.server.service().hooks().active_uploads().await, 0);
    }

    #[tokio::test]
    async fn upload_must_start_with_identifier() {
        let harness = Harness::start().await;
        let mut stream = TcpStream::connect(harness.addr).await.unwrap();
        send(
            &mut stream,
            WireMessage::Call {
                method: Method::Upload,
                headers: Headers::new(),
            },
        )
        .await;
        send(&mut stream, WireMessage::Chunk(Chunk::new(1, b"data".to_vec(), true))).await;
        send(&mut stream, WireMessage::End).await;

        match read_message(&mut stream, 0).await.unwrap() {
            Some(WireMessage::Status(status)) => assert_eq!(status.code, Code::InvalidArgument),
            other => panic!("expected status, got {other:?}"),
        }
        assert!(std::fs::read_dir(harness.store.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn corrupted_download_fails_integrity_check() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Announces the digest of one payload and streams another.
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let call = read_message(&mut stream, 0).await.unwrap();
            assert!(matches!(call, Some(WireMessage::Call { method: Method::Download, .. })));
            let request = read_message(&mut stream, 0).await.unwrap();
            assert_eq!(
                request,
                Some(WireMessage::DownloadRequest(DownloadRequest::new("tok-1", true)))
            );
            send(&mut stream, WireMessage::Digest(digest_bytes(b"hello world"))).await;
            send(&mut stream, WireMessage::Chunk(Chunk::new(1, b"hello w0rld".to_vec(), true)))
                .await;
            send(&mut stream, WireMessage::End).await;
            let _ = read_message(&mut stream, MAX_CHUNK_SIZE).await;
        });

        let local = TempDir::new().unwrap();
        let dest = local.path().join("tok-1.bin");
        let client = TransferClient::new(RpcClient::new(addr));
        let err = client
            .download("tok-1", &dest, &TransferOptions::new().verify(true))
            .await
            .unwrap_err();
        match err {
            TransferError::IntegrityMismatch { local, remote, .. } => {
                assert_eq!(local, digest_bytes(b"hello w0rld"));
                assert_eq!(remote, digest_bytes(b"hello world"));
            }
            other => panic!("expected integrity mismatch, got {other}"),
        }
        assert!(!dest.exists());
    }
}
