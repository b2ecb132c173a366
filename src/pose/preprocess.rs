use anyhow::{ensure, Result};
use ndarray::Array4;
use opencv::{
    core::{AlgorithmHint, Mat, Size, Vec3f, CV_32FC3},
    imgproc,
    prelude::*,
};

/// MoveNet用の入力サイズ
pub const MOVENET_INPUT_SIZE: i32 = 192;

/// BGR の Mat を MoveNet 入力テンソル [1, 192, 192, 3] (RGB, 0.0-255.0) に変換
///
/// 単純リサイズ（レターボックスなし）なので、出力の正規化座標は
/// そのまま元フレームの正規化座標として扱える。
pub fn preprocess_for_movenet(frame: &Mat) -> Result<Array4<f32>> {
    let mut rgb = Mat::default();
    imgproc::cvt_color(
        frame,
        &mut rgb,
        imgproc::COLOR_BGR2RGB,
        0,
        AlgorithmHint::ALGO_HINT_DEFAULT,
    )?;

    let mut resized = Mat::default();
    imgproc::resize(
        &rgb,
        &mut resized,
        Size::new(MOVENET_INPUT_SIZE, MOVENET_INPUT_SIZE),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )?;

    let mut float_mat = Mat::default();
    resized.convert_to(&mut float_mat, CV_32FC3, 1.0, 0.0)?;

    let side = MOVENET_INPUT_SIZE as usize;
    let pixels = float_mat.data_typed::<Vec3f>()?;
    ensure!(
        pixels.len() == side * side,
        "unexpected preprocessed size: {} pixels",
        pixels.len()
    );

    Ok(Array4::from_shape_fn((1, side, side, 3), |(_, y, x, c)| {
        pixels[y * side + x][c]
    }))
}
