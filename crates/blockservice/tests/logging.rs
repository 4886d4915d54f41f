//! Log contract: failures the API hides from callers still show up in logs.

use std::sync::{Arc, Mutex};

use blockservice::{
    Block, BlockService, BlockServiceError, Blockstore, BlockstoreError, BlockstoreResult, Key,
    MemoryBlockstore,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone)]
struct MockWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl std::io::Write for MockWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for MockWriter {
    type Writer = MockWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn setup_capture() -> (MockWriter, tracing::subscriber::DefaultGuard) {
    let writer = MockWriter {
        buf: Arc::new(Mutex::new(Vec::new())),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_writer(writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();

    (writer, tracing::subscriber::set_default(subscriber))
}

fn captured(writer: &MockWriter) -> String {
    String::from_utf8(writer.buf.lock().unwrap().clone()).unwrap()
}

struct CorruptBlockstore;

impl Blockstore for CorruptBlockstore {
    fn put(&self, _block: &Block) -> BlockstoreResult<()> {
        Ok(())
    }

    fn get(&self, _key: &Key) -> BlockstoreResult<Block> {
        Err(BlockstoreError::Io {
            message: "bad sector".to_string(),
        })
    }

    fn has(&self, _key: &Key) -> BlockstoreResult<bool> {
        Ok(false)
    }

    fn delete(&self, _key: &Key) -> BlockstoreResult<()> {
        Ok(())
    }

    fn keys(&self) -> BlockstoreResult<Vec<Key>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_local_malfunction_is_logged_but_reported_as_not_found() {
    let (writer, _guard) = setup_capture();

    let service = BlockService::new(Arc::new(CorruptBlockstore), None).unwrap();
    let key = Key::for_data(b"victim");

    let err = service
        .get_block(&CancellationToken::new(), &key)
        .await
        .unwrap_err();
    assert!(matches!(err, BlockServiceError::NotFound { .. }));
    assert!(!err.to_string().contains("bad sector"));

    let output = captured(&writer);
    assert!(output.contains("WARN"), "missing warning: {output}");
    assert!(output.contains("bad sector"), "underlying error not logged: {output}");
    assert!(output.contains(key.as_str()));
}

#[tokio::test]
async fn test_close_after_rejected_add_is_logged() {
    let (writer, _guard) = setup_capture();

    let service = BlockService::new(Arc::new(MemoryBlockstore::new()), None).unwrap();
    service.close().await.unwrap();

    let block = Block::new(b"late".to_vec());
    let err = service.add_block(&block).await.unwrap_err();
    assert!(err.is_stored());

    let output = captured(&writer);
    assert!(output.contains("block service closed"));
    assert!(output.contains("notifier rejected"));
}
