use fcaccel::accel::SimulatedAccelerator;
use fcaccel::kernel::offload::fully_connected_offloaded;
use fcaccel::kernel::reference::fully_connected_i8;
use fcaccel::{FullyConnectedParams, RuntimeShape};

fn both_paths(params: &FullyConnectedParams, input: &[i8], filter: &[i8], bias: Option<&[i32]>) -> (i8, i8) {
    let depth = input.len();
    let in_shape = RuntimeShape::new(&[1, depth]);
    let f_shape = RuntimeShape::new(&[1, depth]);
    let out_shape = RuntimeShape::new(&[1, 1]);
    let mut r = [0i8; 1];
    fully_connected_i8(params, &in_shape, input, &f_shape, filter, bias, &out_shape, &mut r).unwrap();
    let mut dev = SimulatedAccelerator::default();
    let mut o = [0i8; 1];
    fully_connected_offloaded(params, &mut dev, &in_shape, input, &f_shape, filter, bias, &out_shape, &mut o).unwrap();
    (r[0], o[0])
}

#[test]
fn sum_of_four() {
    let p = FullyConnectedParams::default();
    assert_eq!(both_paths(&p, &[1, 2, 3, 4], &[1, 1, 1, 1], Some(&[0])), (10, 10));
}

#[test]
fn sum_of_four_with_input_offset() {
    let p = FullyConnectedParams { input_offset: 5, ..Default::default() };
    assert_eq!(both_paths(&p, &[1, 2, 3, 4], &[1, 1, 1, 1], Some(&[0])), (30, 30));
}

#[test]
fn accumulator_above_max_clamps() {
    // raw accumulator 200 with the default clamp of 127
    let p = FullyConnectedParams::default();
    assert_eq!(both_paths(&p, &[100, 100], &[1, 1], None), (127, 127));
    let low = FullyConnectedParams { quantized_activation_min: -10, ..Default::default() };
    assert_eq!(both_paths(&low, &[-100, -100], &[1, 1], None), (-10, -10));
}

#[test]
fn bias_and_output_offset() {
    let p = FullyConnectedParams { output_offset: -3, ..Default::default() };
    // 10 + 7 bias - 3 offset
    assert_eq!(both_paths(&p, &[1, 2, 3, 4], &[1, 1, 1, 1], Some(&[7])), (14, 14));
}

#[test]
fn extreme_bias_stays_in_range_on_both_paths() {
    for p in [FullyConnectedParams::default(), FullyConnectedParams { output_multiplier: i32::MAX, output_shift: -3, output_offset: 5, ..Default::default() }] {
        for bias in [i32::MAX, i32::MIN] {
            for input in [[1i8, 1], [-128, 127]] {
                let (r, o) = both_paths(&p, &input, &[1, -1], Some(&[bias]));
                assert_eq!(r, o, "bias {} input {:?}", bias, input);
            }
        }
    }
}
