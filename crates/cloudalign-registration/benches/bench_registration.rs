use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cloudalign_3d::linalg::identity_mat4;
use cloudalign_3d::pointcloud::PointCloud;
use cloudalign_3d::transforms::axis_angle_to_rotation_matrix;
use cloudalign_registration::{global_register, preprocess, refine, GlobalStrategy};

const VOXEL_SIZE: f64 = 0.05;

fn scan_cloud() -> PointCloud {
    let mut points = Vec::new();
    for i in 0..40 {
        for j in 0..40 {
            let x = i as f64 * 0.025 - 0.5;
            let y = j as f64 * 0.025 - 0.5;
            let z = 2.0 + 0.25 * (3.0 * x).sin() * (2.0 * y).cos() + 0.15 * x * x;
            points.push([x, y, z]);
        }
    }
    PointCloud::from_points(points)
}

fn bench_registration(c: &mut Criterion) {
    let source = scan_cloud();
    let rotation = axis_angle_to_rotation_matrix(&[0.2, 1.0, 0.3], 0.3).unwrap();
    let target = source.transform(&rotation, &[0.2, -0.1, 0.1]);

    let (source_down, source_desc) = preprocess(&source, VOXEL_SIZE).unwrap();
    let (target_down, target_desc) = preprocess(&target, VOXEL_SIZE).unwrap();

    c.bench_function("global_register_fast", |b| {
        b.iter(|| {
            black_box(
                global_register(
                    &source_down,
                    &target_down,
                    &source_desc,
                    &target_desc,
                    VOXEL_SIZE,
                    GlobalStrategy::FastGlobal,
                )
                .unwrap(),
            )
        })
    });

    c.bench_function("global_register_ransac", |b| {
        b.iter(|| {
            black_box(
                global_register(
                    &source_down,
                    &target_down,
                    &source_desc,
                    &target_desc,
                    VOXEL_SIZE,
                    GlobalStrategy::Ransac { seed: 42 },
                )
                .unwrap(),
            )
        })
    });

    let coarse = global_register(
        &source_down,
        &target_down,
        &source_desc,
        &target_desc,
        VOXEL_SIZE,
        GlobalStrategy::FastGlobal,
    )
    .unwrap();

    c.bench_function("refine_icp", |b| {
        b.iter(|| black_box(refine(&source, &target, &coarse.transformation, VOXEL_SIZE).unwrap()))
    });

    c.bench_function("self_refine_icp", |b| {
        b.iter(|| black_box(refine(&source, &source, &identity_mat4(), VOXEL_SIZE).unwrap()))
    });
}

criterion_group!(benches, bench_registration);
criterion_main!(benches);
