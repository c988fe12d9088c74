use std::sync::Arc;

use bgcache::{
    generate_master_key_hex, Envelope, MasterKeyStore, StaticSecretProvider, MASTER_KEY_SECRET,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn envelope() -> Envelope {
    let old = generate_master_key_hex().unwrap();
    let new = generate_master_key_hex().unwrap();
    let secret = format!(r#"{{"keys":{{"1":"{old}","1000000":"{new}"}}}}"#);
    let provider = Arc::new(StaticSecretProvider::new(MASTER_KEY_SECRET, secret));
    Envelope::new(Arc::new(MasterKeyStore::load(provider, MASTER_KEY_SECRET)))
}

fn benchmark_envelope(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope");
    let env = envelope();

    // API keys and bearer tokens are short; tokens can reach a few KB.
    let sizes = [("api_key", 44), ("token_1KB", 1024), ("token_4KB", 4 * 1024)];

    for (name, size) in sizes {
        let payload = vec![b'a'; size];
        let sealed = env.seal(&payload).unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("seal", name), &payload, |b, payload| {
            b.iter(|| env.seal(black_box(payload)).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("open", name), &sealed, |b, sealed| {
            b.iter(|| {
                env.open(black_box(&sealed.ciphertext), black_box(sealed.key_id))
                    .unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_envelope);
criterion_main!(benches);
