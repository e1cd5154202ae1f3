use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use uuid::Uuid;
use yrs::{Doc, ReadTxn, Text, Transact, WriteTxn};

use vellum_collab::{
    operation_hash, CollabStore, Command, DocumentRecord, OperationRecord, ReplicatedDoc,
    StoreConfig, ENCODING_V1,
};

/// Build a full-state update containing `content`.
fn text_update(content: &str) -> Vec<u8> {
    let doc = Doc::new();
    {
        let mut txn = doc.transact_mut();
        let text = txn.get_or_insert_text("content");
        text.insert(&mut txn, 0, content);
    }
    let txn = doc.transact();
    txn.encode_state_as_update_v1(&yrs::StateVector::default())
}

fn bench_command_encode(c: &mut Criterion) {
    let cmd = Command::Update {
        doc_id: Uuid::new_v4(),
        payload: vec![0u8; 64],
    };

    c.bench_function("command_encode_64B", |b| {
        b.iter(|| black_box(black_box(&cmd).encode().unwrap()))
    });
}

fn bench_command_decode(c: &mut Criterion) {
    let cmd = Command::Update {
        doc_id: Uuid::new_v4(),
        payload: vec![0u8; 64],
    };
    let encoded = cmd.encode().unwrap();

    c.bench_function("command_decode_64B", |b| {
        b.iter(|| black_box(Command::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_operation_hash(c: &mut Criterion) {
    let payload = vec![42u8; 1024];
    let author = Uuid::new_v4();

    c.bench_function("operation_hash_1KB", |b| {
        b.iter(|| {
            black_box(operation_hash(
                black_box(&payload),
                black_box(author),
                "conn-1",
                7,
            ))
        })
    });
}

fn bench_engine_merge(c: &mut Criterion) {
    let update = text_update("The quick brown fox jumps over the lazy dog.");

    c.bench_function("engine_merge_small", |b| {
        b.iter_batched(
            ReplicatedDoc::new,
            |replica| {
                replica.merge(black_box(&update)).unwrap();
                black_box(replica.text())
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_store_append(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = CollabStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
    let doc_id = Uuid::new_v4();
    let author = Uuid::new_v4();
    store
        .create_document(&DocumentRecord::new(doc_id, author, 0))
        .unwrap();

    let mut clock = 0u64;
    c.bench_function("store_append_1KB", |b| {
        b.iter(|| {
            clock += 1;
            let record = OperationRecord {
                doc_id,
                author,
                payload: vec![clock as u8; 1024],
                clock,
                sequence: clock,
                hash: operation_hash(&[clock as u8], author, "bench", clock),
                client_id: "bench".to_string(),
                timestamp: clock,
                size: 1024,
                compacted: false,
                encoding: ENCODING_V1,
            };
            black_box(store.append_operation(&record).unwrap())
        })
    });
}

criterion_group!(
    benches,
    bench_command_encode,
    bench_command_decode,
    bench_operation_hash,
    bench_engine_merge,
    bench_store_append,
);
criterion_main!(benches);
