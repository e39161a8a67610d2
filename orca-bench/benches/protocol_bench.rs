//! Codec and fragmentation benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use orca_protocol::{
    FragmentHeader, FragmentSplitter, Request, Response, TerrainItem, TerrainRequest,
    TerrainResponse,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn create_terrain_response(items: usize, block_bytes: usize) -> Response {
    Response::Terrain(TerrainResponse {
        request_id: 1001,
        items: (0..items)
            .map(|i| TerrainItem {
                a_longitude: 116.40 + i as f64 * 0.001,
                b_longitude: 116.40 + (i + 1) as f64 * 0.001,
                item_type: 1,
                density: 0.85,
                field6: 100,
                terrain_data: vec![i as u8; block_bytes],
            })
            .collect(),
    })
}

fn bench_request_codec(c: &mut Criterion) {
    let request = Request::Terrain(TerrainRequest {
        request_id: 1001,
        response_terminal: 0,
        a_longitude: 116.40,
        a_latitude: 39.90,
        b_longitude: 116.41,
        b_latitude: 39.91,
        data_source: 1,
    });
    let encoded = request.encode();

    let mut group = c.benchmark_group("terrain_request");
    group.throughput(Throughput::Elements(1));
    group.bench_function("encode", |b| b.iter(|| black_box(request.encode())));
    group.bench_function("decode", |b| {
        b.iter(|| black_box(Request::decode(&encoded).unwrap()))
    });
    group.finish();
}

fn bench_response_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("terrain_response_encode");

    for items in [1, 16, 64] {
        let response = create_terrain_response(items, 256);
        let len = response.encode().unwrap().len();

        group.throughput(Throughput::Bytes(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(items), &response, |b, response| {
            b.iter(|| black_box(response.encode().unwrap()));
        });
    }

    group.finish();
}

fn bench_response_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("terrain_response_decode");

    for items in [1, 16, 64] {
        let encoded = create_terrain_response(items, 256).encode().unwrap();

        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(items), &encoded, |b, encoded| {
            b.iter(|| black_box(Response::decode(encoded).unwrap()));
        });
    }

    group.finish();
}

fn bench_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("split");
    let splitter = FragmentSplitter::for_datagram_size(1400).unwrap();
    let mut rng = StdRng::seed_from_u64(1);

    for size in [1000, 10_000, 60_000] {
        let message = vec![0xA5u8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &message, |b, message| {
            b.iter(|| black_box(splitter.split(message, &mut rng).unwrap()));
        });
    }

    group.finish();
}

fn bench_header_decode(c: &mut Criterion) {
    let mut datagram = FragmentHeader::new(12345, 4, 2, 1385).encode().to_vec();
    datagram.resize(datagram.len() + 1385, 0);

    c.bench_function("fragment_header_parse", |b| {
        b.iter(|| black_box(FragmentHeader::parse_datagram(&datagram).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_request_codec,
    bench_response_encode,
    bench_response_decode,
    bench_split,
    bench_header_decode,
);

criterion_main!(benches);
