use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;

use phd2_exporter::phd2::dispatch::Dispatcher;
use phd2_exporter::phd2::rms::{RmsSample, RmsTracker};
use phd2_exporter::phd2::rpc::{Request, RequestSender, SendError};
use phd2_exporter::phd2::Record;
use phd2_exporter::sink::{MemorySink, PrometheusSink};

struct Discard;

impl RequestSender for Discard {
    fn send(&self, _request: &Request) -> Result<(), SendError> {
        Ok(())
    }
}

fn guide_step_line(frame: u64) -> String {
    json!({
        "Event": "GuideStep",
        "Timestamp": 1_700_000_000.0 + frame as f64,
        "Host": "rig",
        "Inst": 1,
        "Frame": frame,
        "Time": 2.5,
        "Mount": "Simulator",
        "dx": 0.31,
        "dy": -0.12,
        "RADistanceRaw": 0.42,
        "DECDistanceRaw": -0.27,
        "RADistanceGuide": 0.38,
        "DECDistanceGuide": -0.2,
        "RADuration": 120,
        "RADirection": "West",
        "DECDuration": 80,
        "DECDirection": "North",
        "StarMass": 61_234,
        "SNR": 42.7,
        "HFD": 2.31,
        "AvgDist": 0.35
    })
    .to_string()
}

fn identified<S: phd2_exporter::sink::MetricSink>(sink: S, samples: usize) -> Dispatcher<S> {
    let mut d = Dispatcher::new(sink, samples);
    let version: Record = serde_json::from_value(json!({"Event": "Version", "Host": "rig", "Inst": 1}))
        .unwrap_or_default();
    let _ = d.handle_record(&version, &Discard);
    d
}

fn bench_dispatch(c: &mut Criterion) {
    let lines: Vec<String> = (0..64).map(guide_step_line).collect();

    let mut group = c.benchmark_group("dispatch");

    group.bench_function("guide_step_decode_and_dispatch_prometheus", |b| {
        let mut d = identified(Arc::new(PrometheusSink::new("phd2")), 10);
        let mut i = 0usize;
        b.iter(|| {
            let line = &lines[i % lines.len()];
            i += 1;
            let record: Record = serde_json::from_str(black_box(line)).unwrap_or_default();
            let _ = d.handle_record(&record, &Discard);
        });
    });

    group.bench_function("guide_step_dispatch_memory", |b| {
        let records: Vec<Record> = lines
            .iter()
            .map(|l| serde_json::from_str(l).unwrap_or_default())
            .collect();
        let sink = MemorySink::new();
        let mut d = identified(&sink, 10);
        let mut i = 0usize;
        b.iter(|| {
            if i % 4096 == 0 {
                sink.clear();
            }
            let record = &records[i % records.len()];
            i += 1;
            let _ = d.handle_record(black_box(record), &Discard);
        });
    });

    group.finish();
}

fn bench_rms(c: &mut Criterion) {
    let mut group = c.benchmark_group("rms");

    for samples in [10usize, 100] {
        group.bench_function(format!("collect_and_compute_{samples}"), |b| {
            let mut tracker = RmsTracker::new(samples);
            let sink = MemorySink::new();
            let mut n = 0u32;
            b.iter(|| {
                let x = f64::from(n % 17) * 0.05;
                n = n.wrapping_add(1);
                let ready = tracker.collect(&RmsSample::new(x, -x, x * 0.8, -x * 0.8));
                if ready {
                    let _ = tracker.compute_and_emit(black_box(1.52), &sink);
                }
                if n % 4096 == 0 {
                    sink.clear();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_dispatch, bench_rms);
criterion_main!(benches);
