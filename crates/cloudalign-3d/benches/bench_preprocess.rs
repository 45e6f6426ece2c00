use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use cloudalign_3d::features::{compute_fpfh, FpfhParams};
use cloudalign_3d::normals::{estimate_normals, NormalEstimationParams};
use cloudalign_3d::pointcloud::PointCloud;
use cloudalign_3d::spatial::SpatialIndex;
use cloudalign_3d::voxelgrid::VoxelGrid;

fn surface_cloud(side: usize) -> PointCloud {
    let mut points = Vec::with_capacity(side * side);
    for i in 0..side {
        for j in 0..side {
            let x = i as f64 * 0.02 - 1.0;
            let y = j as f64 * 0.02 - 1.0;
            let z = 2.0 + 0.3 * (3.0 * x).sin() * (2.0 * y).cos();
            points.push([x, y, z]);
        }
    }
    PointCloud::from_points(points)
}

fn bench_preprocess(c: &mut Criterion) {
    let mut group = c.benchmark_group("preprocess");

    for side in [32, 64] {
        let cloud = surface_cloud(side);

        group.bench_with_input(BenchmarkId::new("voxel_downsample", side), &cloud, |b, cloud| {
            let grid = VoxelGrid::new(0.05).unwrap();
            b.iter(|| black_box(grid.downsample(cloud).unwrap()))
        });

        let index = SpatialIndex::build(&cloud).unwrap();

        group.bench_with_input(BenchmarkId::new("estimate_normals", side), &cloud, |b, cloud| {
            let params = NormalEstimationParams::with_radius(0.1);
            b.iter(|| black_box(estimate_normals(cloud, &index, &params).unwrap()))
        });

        let normals = estimate_normals(&cloud, &index, &NormalEstimationParams::with_radius(0.1))
            .unwrap();
        let with_normals = cloud.with_normals(normals).unwrap();

        group.bench_with_input(
            BenchmarkId::new("compute_fpfh", side),
            &with_normals,
            |b, cloud| {
                let params = FpfhParams::with_radius(0.25);
                b.iter(|| black_box(compute_fpfh(cloud, &index, &params).unwrap()))
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_preprocess);
criterion_main!(benches);
