extern crate add2;

use add2::error::{Add2Error, Step};
use add2::*;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn upload(device: &Device, n: usize, seed: u64) -> (DeviceBuffer, DeviceBuffer) {
    let mut rng = StdRng::seed_from_u64(seed);
    let a = bench::random_buffer(device, n * n, &mut rng).unwrap();
    let b = bench::random_buffer(device, n * n, &mut rng).unwrap();
    (a, b)
}

fn host_sum(device: &Device, a: &DeviceBuffer, b: &DeviceBuffer) -> Vec<f32> {
    let a = device.dtoh(a).unwrap();
    let b = device.dtoh(b).unwrap();
    a.iter().zip(&b).map(|(x, y)| x + y).collect()
}

#[test]
fn single_element() {
    let device = Device::new(0).unwrap();
    let a = device.htod_copy(vec![1.5]).unwrap();
    let b = device.htod_copy(vec![-0.25]).unwrap();
    let c = device.alloc_empty(1).unwrap();
    launch_add2(&device, &c, &a, &b, 1).unwrap();
    assert_eq!(device.dtoh(&c).unwrap(), vec![1.25]);
}

#[test]
fn tail_block() {
    let n = 33;
    let cfg = LaunchConfig::for_num_elems(n * n);
    assert_eq!(cfg.grid_dim, 5);
    assert_eq!(cfg.tail_lanes(n * n), 65);

    let device = Device::with_threads(0, Some(3)).unwrap();
    let (a, b) = upload(&device, n, 33);
    let c = device.alloc_empty(n * n).unwrap();
    launch_add2(&device, &c, &a, &b, n).unwrap();

    let out = device.dtoh(&c).unwrap();
    assert_eq!(out.len(), 1089);
    assert_eq!(out, host_sum(&device, &a, &b));
}

#[test]
fn idempotent() {
    let n = 50;
    let device = Device::new(0).unwrap();
    let (a, b) = upload(&device, n, 5);
    let c = device.alloc_empty(n * n).unwrap();
    launch_add2(&device, &c, &a, &b, n).unwrap();
    let first = device.dtoh(&c).unwrap();
    for _ in 0..3 {
        launch_add2(&device, &c, &a, &b, n).unwrap();
    }
    assert_eq!(device.dtoh(&c).unwrap(), first);
}

#[test]
fn matches_reference_1024() {
    let n = 1024;
    let device = Device::new(0).unwrap();
    let (a, b) = upload(&device, n, 1024);
    let c = device.alloc_empty(n * n).unwrap();
    launch_add2(&device, &c, &a, &b, n).unwrap();
    device.synchronize().unwrap();

    let expected = device.dtoh(&device.add(&a, &b).unwrap()).unwrap();
    let cmp = allclose(&device.dtoh(&c).unwrap(), &expected, 1e-5, 0.0);
    assert!(cmp.passed);
    assert_eq!(cmp.max_abs_diff, 0.0);
}

#[test]
fn length_mismatch_rejected_before_dispatch() {
    let device = Device::new(0).unwrap();
    let a = device.alloc_zeros(16).unwrap();
    let b = device.alloc_zeros(15).unwrap();
    let c = device.alloc_empty(16).unwrap();
    match launch_add2(&device, &c, &a, &b, 4) {
        Err(Add2Error::Precondition { step, reason }) => {
            assert_eq!(step, Step::Launch);
            assert_eq!(reason, "length of B is 15, expected 16");
        }
        other => panic!("unexpected: {:?}", other),
    }
    // nothing reached the stream, C still holds its poison
    assert!(device.dtoh(&c).unwrap().iter().all(|x| x.is_nan()));
}

#[test]
fn buffer_of_other_device_rejected() {
    let dev0 = Device::new(0).unwrap();
    let dev1 = Device::new(1).unwrap();
    let a = dev0.alloc_zeros(4).unwrap();
    let b = dev1.alloc_zeros(4).unwrap();
    let c = dev0.alloc_empty(4).unwrap();
    assert!(launch_add2(&dev0, &c, &a, &b, 2).is_err());
}

#[test]
fn faulted_device_refuses_launch() {
    let device = Device::new(0).unwrap();
    let (a, b) = upload(&device, 4, 0);
    let c = device.alloc_empty(16).unwrap();
    device.submit(|_| panic!("out of resources")).unwrap();
    match device.synchronize() {
        Err(Add2Error::DeviceFault { .. }) => {}
        other => panic!("unexpected: {:?}", other),
    }
    assert!(launch_add2(&device, &c, &a, &b, 4).is_err());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_elementwise_exact(
        n in 1usize..48,
        seed in any::<u64>(),
        scale in prop::num::f32::NORMAL.prop_filter("bounded", |x| x.abs() < 1e30),
    ) {
        let device = Device::with_threads(0, Some(2)).unwrap();
        let (a, b) = upload(&device, n, seed);
        let a_host: Vec<f32> = device.dtoh(&a).unwrap().iter().map(|x| x * scale).collect();
        let a = device.htod_copy(a_host).unwrap();
        let c = device.alloc_empty(n * n).unwrap();
        launch_add2(&device, &c, &a, &b, n).unwrap();

        let out = device.dtoh(&c).unwrap();
        let expected = host_sum(&device, &a, &b);
        for (i, (x, y)) in out.iter().zip(&expected).enumerate() {
            prop_assert_eq!(x.to_bits(), y.to_bits(), "element {}", i);
        }
    }
}
