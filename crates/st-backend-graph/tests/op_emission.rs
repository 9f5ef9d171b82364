// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Each wrapper must call the expected engine primitive with correctly
//! transformed arguments. The trace engine records every emission; these
//! tests read the tail of the node table back.

use std::sync::Arc;

use st_backend_graph::engine::{
    ArgReduceOp, BinaryOp, DType, Engine, Padding, PoolKind, ReduceOp, UnaryOp,
};
use st_backend_graph::ops::conv::DimOrdering;
use st_backend_graph::ops::{self, reductions};
use st_backend_graph::trace::{TraceEngine, TraceOp};
use st_backend_graph::{function, gradients, rnn, switch, Error, GraphTensor};

fn setup() -> (Arc<TraceEngine>, Engine) {
    let trace = TraceEngine::new();
    let engine: Engine = trace.clone();
    (trace, engine)
}

fn ph(engine: &Engine, shape: &[usize]) -> GraphTensor {
    let dims: Vec<Option<usize>> = shape.iter().map(|&d| Some(d)).collect();
    ops::variables::placeholder(engine, Some(&dims), None, None, None).unwrap()
}

#[test]
fn sum_wraps_a_negative_axis_before_dispatch() {
    let (trace, engine) = setup();
    let x = ph(&engine, &[2, 3, 4]);
    let y = reductions::sum(&x, Some(-1), false).unwrap();
    match trace.op(y.node()).unwrap() {
        TraceOp::Reduce { op, axis, keepdims, .. } => {
            assert_eq!(op, ReduceOp::Sum);
            assert_eq!(axis, Some(2));
            assert!(!keepdims);
        }
        other => panic!("expected reduce, recorded {other:?}"),
    }
    assert_eq!(y.shape().unwrap(), vec![Some(2), Some(3)]);
}

#[test]
fn sum_rejects_a_positive_axis_past_the_rank() {
    let (_, engine) = setup();
    let x = ph(&engine, &[2, 3, 4]);
    let result = reductions::sum(&x, Some(5), false);
    assert!(matches!(
        result,
        Err(Error::AxisOutOfRange { axis: 5, rank: 3 })
    ));
}

#[test]
fn prod_normalizes_negative_axes_too() {
    let (trace, engine) = setup();
    let x = ph(&engine, &[2, 3]);
    let y = reductions::prod(&x, Some(-2), true).unwrap();
    match trace.op(y.node()).unwrap() {
        TraceOp::Reduce { op, axis, keepdims, .. } => {
            assert_eq!(op, ReduceOp::Prod);
            assert_eq!(axis, Some(0));
            assert!(keepdims);
        }
        other => panic!("expected reduce, recorded {other:?}"),
    }
}

#[test]
fn any_casts_to_bool_reduces_and_casts_to_i8() {
    let (trace, engine) = setup();
    let x = ph(&engine, &[4]);
    let y = reductions::any(&x, None, false).unwrap();
    let TraceOp::Cast { x: reduced, dtype } = trace.op(y.node()).unwrap() else {
        panic!("expected final i8 cast");
    };
    assert_eq!(dtype, DType::I8);
    let TraceOp::Reduce { op, x: as_bool, .. } = trace.op(reduced).unwrap() else {
        panic!("expected reduce-any under the cast");
    };
    assert_eq!(op, ReduceOp::Any);
    let TraceOp::Cast { dtype, .. } = trace.op(as_bool).unwrap() else {
        panic!("expected bool cast under the reduce");
    };
    assert_eq!(dtype, DType::Bool);
}

#[test]
fn std_composes_mean_square_sqrt() {
    let (trace, engine) = setup();
    let x = ph(&engine, &[3, 5]);
    let y = reductions::std(&x, Some(-1), false).unwrap();
    let TraceOp::Unary { op: UnaryOp::Sqrt, x: variance } = trace.op(y.node()).unwrap() else {
        panic!("expected sqrt at the top of std");
    };
    let TraceOp::Reduce { op: ReduceOp::Mean, axis, .. } = trace.op(variance).unwrap() else {
        panic!("expected mean of squared deviations");
    };
    assert_eq!(axis, Some(1));
}

#[test]
fn argmax_defaults_to_the_last_axis_by_wraparound() {
    let (trace, engine) = setup();
    let x = ph(&engine, &[2, 7]);
    let y = reductions::argmax(&x, -1).unwrap();
    match trace.op(y.node()).unwrap() {
        TraceOp::ArgReduce { op, axis, .. } => {
            assert_eq!(op, ArgReduceOp::Max);
            assert_eq!(axis, 1);
        }
        other => panic!("expected arg reduce, recorded {other:?}"),
    }
    assert_eq!(y.dtype().unwrap(), DType::I64);
}

#[test]
fn sqrt_clamps_negatives_before_the_engine_sees_them() {
    let (trace, engine) = setup();
    let x = ph(&engine, &[3]);
    let y = ops::elementwise::sqrt(&x).unwrap();
    let TraceOp::Unary { op: UnaryOp::Sqrt, x: clipped } = trace.op(y.node()).unwrap() else {
        panic!("expected sqrt emission");
    };
    match trace.op(clipped).unwrap() {
        TraceOp::Clip { lo, hi, .. } => {
            assert_eq!(lo, 0.0);
            assert!(hi.is_infinite());
        }
        other => panic!("expected clip under sqrt, recorded {other:?}"),
    }
}

#[test]
fn clip_raises_an_inverted_max_to_min() {
    let (trace, engine) = setup();
    let x = ph(&engine, &[3]);
    let y = ops::elementwise::clip(&x, 5.0, 2.0).unwrap();
    match trace.op(y.node()).unwrap() {
        TraceOp::Clip { lo, hi, .. } => {
            assert_eq!(lo, 5.0);
            assert_eq!(hi, 5.0);
        }
        other => panic!("expected clip, recorded {other:?}"),
    }
}

#[test]
fn pow_lifts_the_exponent_into_the_graph() {
    let (trace, engine) = setup();
    let x = ph(&engine, &[2]);
    let y = ops::elementwise::pow(&x, 3.0).unwrap();
    let TraceOp::Binary { op: BinaryOp::Pow, y: exponent, .. } = trace.op(y.node()).unwrap() else {
        panic!("expected pow emission");
    };
    match trace.op(exponent).unwrap() {
        TraceOp::Scalar { value } => assert_eq!(value, 3.0),
        other => panic!("expected lifted scalar, recorded {other:?}"),
    }
}

#[test]
fn transpose_reverses_every_axis() {
    let (trace, engine) = setup();
    let x = ph(&engine, &[2, 3, 4]);
    let y = ops::linalg::transpose(&x).unwrap();
    match trace.op(y.node()).unwrap() {
        TraceOp::Permute { pattern, .. } => assert_eq!(pattern, vec![2, 1, 0]),
        other => panic!("expected permute, recorded {other:?}"),
    }
    assert_eq!(y.shape().unwrap(), vec![Some(4), Some(3), Some(2)]);
}

#[test]
fn dot_delegates_to_matmul_with_inferred_shape() {
    let (trace, engine) = setup();
    let x = ph(&engine, &[2, 3]);
    let y = ph(&engine, &[3, 5]);
    let z = ops::linalg::dot(&x, &y).unwrap();
    assert!(matches!(trace.op(z.node()).unwrap(), TraceOp::Matmul { .. }));
    assert_eq!(z.shape().unwrap(), vec![Some(2), Some(5)]);
}

#[test]
fn concatenate_wraps_the_axis_on_the_first_operand() {
    let (trace, engine) = setup();
    let a = ph(&engine, &[2, 3]);
    let b = ph(&engine, &[2, 4]);
    let y = ops::shape::concatenate(&[a, b], -1).unwrap();
    match trace.op(y.node()).unwrap() {
        TraceOp::Concat { axis, xs } => {
            assert_eq!(axis, 1);
            assert_eq!(xs.len(), 2);
        }
        other => panic!("expected concat, recorded {other:?}"),
    }
    assert_eq!(y.shape().unwrap(), vec![Some(2), Some(7)]);
}

#[test]
fn repeat_elements_splits_into_unit_slices_and_replicates() {
    let (trace, engine) = setup();
    let x = ph(&engine, &[2, 3, 4]);
    let y = ops::shape::repeat_elements(&x, 2, 1).unwrap();
    let TraceOp::Concat { xs, axis } = trace.op(y.node()).unwrap() else {
        panic!("expected concat of replicated slices");
    };
    assert_eq!(axis, 1);
    // 3 unit slices, each listed twice, adjacent copies.
    assert_eq!(xs.len(), 6);
    assert_eq!(xs[0], xs[1]);
    assert_ne!(xs[1], xs[2]);
    assert_eq!(y.shape().unwrap(), vec![Some(2), Some(6), Some(4)]);
}

#[test]
fn repeat_stacks_then_moves_samples_first() {
    let (trace, engine) = setup();
    let x = ph(&engine, &[5, 8]);
    let y = ops::shape::repeat(&x, 3).unwrap();
    let TraceOp::Permute { pattern, x: stacked } = trace.op(y.node()).unwrap() else {
        panic!("expected permute over the stack");
    };
    assert_eq!(pattern, vec![1, 0, 2]);
    match trace.op(stacked).unwrap() {
        TraceOp::Stack { xs } => assert_eq!(xs.len(), 3),
        other => panic!("expected stack, recorded {other:?}"),
    }
    assert_eq!(y.shape().unwrap(), vec![Some(5), Some(3), Some(8)]);
}

#[test]
fn batch_flatten_conserves_the_leading_dimension() {
    let (trace, engine) = setup();
    let x = ph(&engine, &[2, 3, 4]);
    let y = ops::shape::batch_flatten(&x).unwrap();
    match trace.op(y.node()).unwrap() {
        TraceOp::Reshape { shape, .. } => assert_eq!(shape, vec![-1, 12]),
        other => panic!("expected reshape, recorded {other:?}"),
    }
    assert_eq!(y.shape().unwrap(), vec![Some(2), Some(12)]);
}

#[test]
fn expand_dims_accepts_a_negative_insert_position() {
    let (_, engine) = setup();
    let x = ph(&engine, &[2, 3]);
    let y = ops::shape::expand_dims(&x, -1).unwrap();
    assert_eq!(y.shape().unwrap(), vec![Some(2), Some(3), Some(1)]);
    let z = ops::shape::squeeze(&y, -1).unwrap();
    assert_eq!(z.shape().unwrap(), vec![Some(2), Some(3)]);
}

#[test]
fn temporal_padding_pads_only_the_middle_dimension() {
    let (trace, engine) = setup();
    let x = ph(&engine, &[2, 5, 7]);
    let y = ops::shape::temporal_padding(&x, 2).unwrap();
    match trace.op(y.node()).unwrap() {
        TraceOp::Pad { amounts, .. } => {
            assert_eq!(amounts, vec![(0, 0), (2, 2), (0, 0)]);
        }
        other => panic!("expected pad, recorded {other:?}"),
    }
    assert_eq!(y.shape().unwrap(), vec![Some(2), Some(9), Some(7)]);
}

#[test]
fn spatial_padding_follows_the_channel_ordering() {
    let (trace, engine) = setup();
    let x = ph(&engine, &[1, 3, 8, 8]);
    let th = ops::shape::spatial_2d_padding(&x, (1, 2), DimOrdering::ChannelFirst).unwrap();
    match trace.op(th.node()).unwrap() {
        TraceOp::Pad { amounts, .. } => {
            assert_eq!(amounts, vec![(0, 0), (0, 0), (1, 1), (2, 2)]);
        }
        other => panic!("expected pad, recorded {other:?}"),
    }
    let tf = ops::shape::spatial_2d_padding(&x, (1, 2), DimOrdering::ChannelLast).unwrap();
    match trace.op(tf.node()).unwrap() {
        TraceOp::Pad { amounts, .. } => {
            assert_eq!(amounts, vec![(0, 0), (1, 1), (2, 2), (0, 0)]);
        }
        other => panic!("expected pad, recorded {other:?}"),
    }
}

#[test]
fn resize_images_translates_channel_first_around_the_native_call() {
    let (trace, engine) = setup();
    let x = ph(&engine, &[2, 3, 4, 5]);
    let y = ops::shape::resize_images(&x, 2, 3, DimOrdering::ChannelFirst).unwrap();
    let TraceOp::Permute { pattern, x: resized } = trace.op(y.node()).unwrap() else {
        panic!("expected permute back to channel-first");
    };
    assert_eq!(pattern, vec![0, 3, 1, 2]);
    let TraceOp::ResizeNearest { height, width, x: nhwc } = trace.op(resized).unwrap() else {
        panic!("expected the native resize");
    };
    assert_eq!((height, width), (8, 15));
    match trace.op(nhwc).unwrap() {
        TraceOp::Permute { pattern, .. } => assert_eq!(pattern, vec![0, 2, 3, 1]),
        other => panic!("expected permute to channel-last, recorded {other:?}"),
    }
    assert_eq!(
        y.shape().unwrap(),
        vec![Some(2), Some(3), Some(8), Some(15)]
    );
}

#[test]
fn conv2d_channel_first_permutes_input_kernel_and_output() {
    let (trace, engine) = setup();
    let x = ph(&engine, &[2, 3, 8, 8]);
    let kernel = ph(&engine, &[4, 3, 3, 3]);
    let y = ops::conv::conv2d(
        &x,
        &kernel,
        (1, 1),
        Padding::Valid,
        DimOrdering::ChannelFirst,
    )
    .unwrap();
    let TraceOp::Permute { pattern, x: conv } = trace.op(y.node()).unwrap() else {
        panic!("expected permute back to channel-first");
    };
    assert_eq!(pattern, vec![0, 3, 1, 2]);
    let TraceOp::Conv2d { x: xin, kernel: kin, strides, padding } = trace.op(conv).unwrap() else {
        panic!("expected the native conv");
    };
    assert_eq!(strides, (1, 1));
    assert_eq!(padding, Padding::Valid);
    match trace.op(xin).unwrap() {
        TraceOp::Permute { pattern, .. } => assert_eq!(pattern, vec![0, 2, 3, 1]),
        other => panic!("expected channel-last input permute, recorded {other:?}"),
    }
    match trace.op(kin).unwrap() {
        TraceOp::Permute { pattern, .. } => assert_eq!(pattern, vec![2, 3, 1, 0]),
        other => panic!("expected hwio kernel permute, recorded {other:?}"),
    }
    // (8 - 3) / 1 + 1 = 6 on both spatial dims, back in channel-first layout.
    assert_eq!(
        y.shape().unwrap(),
        vec![Some(2), Some(4), Some(6), Some(6)]
    );
}

#[test]
fn conv2d_channel_last_goes_straight_through() {
    let (trace, engine) = setup();
    let x = ph(&engine, &[2, 8, 8, 3]);
    let kernel = ph(&engine, &[3, 3, 3, 4]);
    let y = ops::conv::conv2d(&x, &kernel, (2, 2), Padding::Same, DimOrdering::ChannelLast)
        .unwrap();
    assert!(matches!(trace.op(y.node()).unwrap(), TraceOp::Conv2d { .. }));
    assert_eq!(
        y.shape().unwrap(),
        vec![Some(2), Some(4), Some(4), Some(4)]
    );
}

#[test]
fn pool2d_channel_first_translates_layout_and_keeps_the_kind() {
    let (trace, engine) = setup();
    let x = ph(&engine, &[1, 2, 6, 6]);
    let y = ops::conv::pool2d(
        &x,
        (2, 2),
        (2, 2),
        Padding::Valid,
        DimOrdering::ChannelFirst,
        PoolKind::Avg,
    )
    .unwrap();
    let TraceOp::Permute { x: pooled, .. } = trace.op(y.node()).unwrap() else {
        panic!("expected permute back to channel-first");
    };
    match trace.op(pooled).unwrap() {
        TraceOp::Pool2d { kind, pool, .. } => {
            assert_eq!(kind, PoolKind::Avg);
            assert_eq!(pool, (2, 2));
        }
        other => panic!("expected pool, recorded {other:?}"),
    }
    assert_eq!(
        y.shape().unwrap(),
        vec![Some(1), Some(2), Some(3), Some(3)]
    );
}

#[test]
fn relu_composes_the_negative_part_and_optional_ceiling() {
    let (trace, engine) = setup();
    let x = ph(&engine, &[4]);
    let y = ops::nn::relu(&x, 0.1, Some(6.0)).unwrap();
    let TraceOp::Binary { op: BinaryOp::Sub, x: clipped, y: scaled } =
        trace.op(y.node()).unwrap()
    else {
        panic!("expected final subtraction");
    };
    match trace.op(clipped).unwrap() {
        TraceOp::Clip { lo, hi, .. } => {
            assert_eq!(lo, 0.0);
            assert_eq!(hi, 6.0);
        }
        other => panic!("expected ceiling clip, recorded {other:?}"),
    }
    let TraceOp::Binary { op: BinaryOp::Mul, x: slope, .. } = trace.op(scaled).unwrap() else {
        panic!("expected alpha scaling");
    };
    match trace.op(slope).unwrap() {
        TraceOp::Scalar { value } => assert_eq!(value, 0.1),
        other => panic!("expected lifted alpha, recorded {other:?}"),
    }
}

#[test]
fn hard_sigmoid_is_a_clipped_affine_map() {
    let (trace, engine) = setup();
    let x = ph(&engine, &[4]);
    let y = ops::nn::hard_sigmoid(&x).unwrap();
    match trace.op(y.node()).unwrap() {
        TraceOp::Clip { lo, hi, .. } => {
            assert_eq!(lo, 0.0);
            assert_eq!(hi, 1.0);
        }
        other => panic!("expected clip, recorded {other:?}"),
    }
}

#[test]
fn categorical_crossentropy_probability_path_renormalizes_and_clips() {
    let (trace, engine) = setup();
    let output = ph(&engine, &[2, 10]);
    let target = ph(&engine, &[2, 10]);
    let y = ops::nn::categorical_crossentropy(&output, &target, false).unwrap();
    let TraceOp::Unary { op: UnaryOp::Neg, x: summed } = trace.op(y.node()).unwrap() else {
        panic!("expected negation at the top");
    };
    let TraceOp::Reduce { op: ReduceOp::Sum, axis, keepdims, x: weighted } =
        trace.op(summed).unwrap()
    else {
        panic!("expected sum over the class axis");
    };
    assert_eq!(axis, Some(1));
    assert!(!keepdims);
    let TraceOp::Binary { op: BinaryOp::Mul, y: log_probs, .. } = trace.op(weighted).unwrap()
    else {
        panic!("expected target * log(output)");
    };
    let TraceOp::Unary { op: UnaryOp::Log, x: clipped } = trace.op(log_probs).unwrap() else {
        panic!("expected log of clipped probabilities");
    };
    match trace.op(clipped).unwrap() {
        TraceOp::Clip { lo, hi, .. } => {
            assert!(lo > 0.0 && lo < 1e-5);
            assert!(hi < 1.0);
        }
        other => panic!("expected epsilon clip, recorded {other:?}"),
    }
    assert_eq!(y.shape().unwrap(), vec![Some(2)]);
}

#[test]
fn categorical_crossentropy_logits_path_uses_the_fused_primitive() {
    let (trace, engine) = setup();
    let output = ph(&engine, &[2, 10]);
    let target = ph(&engine, &[2, 10]);
    let y = ops::nn::categorical_crossentropy(&output, &target, true).unwrap();
    assert!(matches!(
        trace.op(y.node()).unwrap(),
        TraceOp::SoftmaxCrossEntropy { .. }
    ));
}

#[test]
fn binary_crossentropy_probability_path_recovers_logits() {
    let (trace, engine) = setup();
    let output = ph(&engine, &[6]);
    let target = ph(&engine, &[6]);
    let y = ops::nn::binary_crossentropy(&output, &target, false).unwrap();
    let TraceOp::SigmoidCrossEntropy { logits, .. } = trace.op(y.node()).unwrap() else {
        panic!("expected the fused sigmoid primitive");
    };
    assert!(matches!(
        trace.op(logits).unwrap(),
        TraceOp::Unary { op: UnaryOp::Log, .. }
    ));
}

#[test]
fn dropout_converts_level_to_retain_probability() {
    let (trace, engine) = setup();
    let x = ph(&engine, &[8]);
    let y = ops::nn::dropout(&x, 0.25, Some(17)).unwrap();
    match trace.op(y.node()).unwrap() {
        TraceOp::Dropout { keep_prob, seed, .. } => {
            assert!((keep_prob - 0.75).abs() < 1e-12);
            assert_eq!(seed, 17);
        }
        other => panic!("expected dropout, recorded {other:?}"),
    }
}

#[test]
fn l2_normalize_wraps_its_axis() {
    let (trace, engine) = setup();
    let x = ph(&engine, &[2, 3]);
    let y = ops::nn::l2_normalize(&x, -1).unwrap();
    match trace.op(y.node()).unwrap() {
        TraceOp::L2Normalize { axis, .. } => assert_eq!(axis, 1),
        other => panic!("expected l2 normalize, recorded {other:?}"),
    }
}

#[test]
fn switch_lowers_to_the_engine_conditional() {
    let (trace, engine) = setup();
    let pred = ph(&engine, &[]);
    let a = ph(&engine, &[3]);
    let b = ph(&engine, &[3]);
    let y = switch(&pred, &a, &b).unwrap();
    assert!(matches!(trace.op(y.node()).unwrap(), TraceOp::Cond { .. }));
}

#[test]
fn gradients_come_back_one_per_variable() {
    let (trace, engine) = setup();
    let loss = ph(&engine, &[]);
    let w = ph(&engine, &[3, 3]);
    let b = ph(&engine, &[3]);
    let grads = gradients(&loss, &[w.clone(), b.clone()]).unwrap();
    assert_eq!(grads.len(), 2);
    assert_eq!(grads[0].shape().unwrap(), w.shape().unwrap());
    assert_eq!(grads[1].shape().unwrap(), b.shape().unwrap());
    assert!(matches!(
        trace.op(grads[0].node()).unwrap(),
        TraceOp::Gradient { .. }
    ));
}

#[test]
fn random_constructors_record_their_distribution_parameters() {
    let (trace, engine) = setup();
    let n = ops::random::random_normal(&engine, &[2, 2], 1.0, 0.5, None, Some(42)).unwrap();
    match trace.op(n.node()).unwrap() {
        TraceOp::RandomNormal { shape, mean, std, seed } => {
            assert_eq!(shape, vec![2, 2]);
            assert_eq!(mean, 1.0);
            assert_eq!(std, 0.5);
            assert_eq!(seed, 42);
        }
        other => panic!("expected random normal, recorded {other:?}"),
    }
    let u = ops::random::random_uniform(&engine, &[3], -1.0, 1.0, None, None).unwrap();
    match trace.op(u.node()).unwrap() {
        TraceOp::RandomUniform { low, high, seed, .. } => {
            assert_eq!(low, -1.0);
            assert_eq!(high, 1.0);
            assert!(seed < 10_000_000);
        }
        other => panic!("expected random uniform, recorded {other:?}"),
    }
}

#[test]
fn placeholder_with_ndim_only_is_fully_symbolic() {
    let (_, engine) = setup();
    let x = ops::variables::placeholder(&engine, None, Some(3), None, None).unwrap();
    assert_eq!(x.shape().unwrap(), vec![None, None, None]);
    assert!(matches!(
        ops::variables::count_params(&x),
        Err(Error::SymbolicDim { .. })
    ));
}

#[test]
fn zeros_like_stays_in_the_graph_for_symbolic_shapes() {
    let (trace, engine) = setup();
    let x = ops::variables::placeholder(
        &engine,
        Some(&[None, Some(3)]),
        None,
        None,
        Some("batch"),
    )
    .unwrap();
    let z = ops::variables::zeros_like(&x).unwrap();
    match trace.op(z.node()).unwrap() {
        TraceOp::FillLike { value, .. } => assert_eq!(value, 0.0),
        other => panic!("expected fill-like, recorded {other:?}"),
    }
    // Shape and dtype follow the source, symbolic dimension included.
    assert_eq!(z.shape().unwrap(), vec![None, Some(3)]);
    assert_eq!(z.dtype().unwrap(), x.dtype().unwrap());

    let o = ops::variables::ones_like(&x).unwrap();
    match trace.op(o.node()).unwrap() {
        TraceOp::FillLike { value, .. } => assert_eq!(value, 1.0),
        other => panic!("expected fill-like, recorded {other:?}"),
    }
}

#[test]
fn count_params_multiplies_static_dimensions() {
    let (_, engine) = setup();
    let x = ph(&engine, &[3, 4, 5]);
    assert_eq!(ops::variables::count_params(&x).unwrap(), 60);
}

#[test]
fn rnn_unrolls_the_time_axis_and_stacks_outputs() {
    let (trace, engine) = setup();
    let inputs = ph(&engine, &[2, 3, 4]);
    let state = ph(&engine, &[2, 5]);
    let mut calls = 0usize;
    let (last, outputs, states) = rnn(
        |input, states| {
            calls += 1;
            assert_eq!(input.shape().unwrap(), vec![Some(2), Some(4)]);
            Ok((input.clone(), states.to_vec()))
        },
        &inputs,
        &[state.clone()],
        false,
        false,
    )
    .unwrap();
    assert_eq!(calls, 3);
    assert_eq!(outputs.shape().unwrap(), vec![Some(2), Some(3), Some(4)]);
    assert_eq!(last.shape().unwrap(), vec![Some(2), Some(4)]);
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].node(), state.node());
    // Outputs are restacked time-major then swapped back to samples-first.
    let TraceOp::Permute { pattern, x: stacked } = trace.op(outputs.node()).unwrap() else {
        panic!("expected final permute");
    };
    assert_eq!(pattern, vec![1, 0, 2]);
    assert!(matches!(trace.op(stacked).unwrap(), TraceOp::Stack { .. }));
}

#[test]
fn rnn_go_backwards_reverses_the_unroll_order() {
    let (trace, engine) = setup();
    let inputs = ph(&engine, &[1, 3, 2]);
    let mut seen = Vec::new();
    rnn(
        |input, states| {
            seen.push(input.node());
            Ok((input.clone(), states.to_vec()))
        },
        &inputs,
        &[],
        true,
        false,
    )
    .unwrap();
    assert_eq!(seen.len(), 3);
    // Unstack indices run 0..3; backwards iteration must visit 2 first.
    let first = match trace.op(seen[0]).unwrap() {
        TraceOp::Unstack { index, .. } => index,
        other => panic!("expected unstacked step, recorded {other:?}"),
    };
    let last = match trace.op(seen[2]).unwrap() {
        TraceOp::Unstack { index, .. } => index,
        other => panic!("expected unstacked step, recorded {other:?}"),
    };
    assert_eq!(first, 2);
    assert_eq!(last, 0);
}

#[test]
fn rnn_masking_always_fails() {
    let (_, engine) = setup();
    let inputs = ph(&engine, &[2, 3, 4]);
    let result = rnn(
        |input, states| Ok((input.clone(), states.to_vec())),
        &inputs,
        &[],
        false,
        true,
    );
    assert!(matches!(result, Err(Error::MaskingUnsupported)));
}

#[test]
fn compiled_function_rejects_wrong_arity() {
    let (_, engine) = setup();
    let x = ph(&engine, &[2]);
    let f = function(vec![x.clone()], vec![x], vec![]).unwrap();
    let err = f.call(&[]).unwrap_err();
    assert!(matches!(
        err,
        Error::ArityMismatch { expected: 1, got: 0 }
    ));
}

#[test]
fn compiled_function_needs_something_to_bind() {
    let result = function(vec![], vec![], vec![]);
    assert!(matches!(result, Err(Error::EmptyInput(_))));
}
