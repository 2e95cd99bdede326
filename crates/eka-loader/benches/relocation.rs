use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use eka_loader::{Compression, Cpu, FixedBase, ImageBuilder, Loader, RelocEntry, RelocKind};

/// Image with `count` abs32 relocations spread over consecutive words
fn image_with_relocs(count: u32, compression: Compression) -> Vec<u8> {
    let code: Vec<u8> = (0..count).flat_map(|i| (i * 4).to_le_bytes()).collect();
    let mut builder = ImageBuilder::new(Cpu::ArmV5).code(code).compression(compression);
    for i in 0..count {
        let kind = if i % 4 == 3 {
            RelocKind::Rel32
        } else {
            RelocKind::Abs32
        };
        builder = builder.code_reloc(RelocEntry::new(i * 4, kind));
    }
    builder.build().unwrap()
}

fn bench_relocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("relocate");
    let loader = Loader::default();

    for count in [256u32, 4096, 32768] {
        let raw = image_with_relocs(count, Compression::None);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &raw, |b, raw| {
            b.iter(|| {
                loader
                    .load_bytes_with(black_box(raw), &mut FixedBase(0x7000_0000))
                    .unwrap()
            })
        });
    }

    group.finish();
}

fn bench_rebase(c: &mut Criterion) {
    let raw = image_with_relocs(4096, Compression::None);
    let image = Loader::default().load_bytes(&raw).unwrap();

    c.bench_function("rebase_4096", |b| {
        b.iter(|| image.rebase(black_box(0x4000_0000)).unwrap())
    });
}

fn bench_inflate(c: &mut Criterion) {
    let raw = image_with_relocs(32768, Compression::Deflate);
    let loader = Loader::default();

    c.bench_function("load_compressed_32768", |b| {
        b.iter(|| loader.load_bytes(black_box(&raw)).unwrap())
    });
}

criterion_group!(benches, bench_relocate, bench_rebase, bench_inflate);
criterion_main!(benches);
