//! カメラ無しで投影行列を確認するツール
//!
//! 設定ファイルのスクリーンと指定した目の位置から視錐台と投影行列を表示する。

use anyhow::{Context, Result};
use clap::Parser;
use nalgebra::Point3;
use std::path::PathBuf;

use parallax_tracker::config::Config;
use parallax_tracker::display::Screen;

#[derive(Parser, Debug)]
#[command(name = "projection_probe", version, about, long_about = None)]
struct Args {
    /// 設定ファイル（省略時はデフォルトのスクリーン）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 目の位置 (cm)
    #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], allow_negative_numbers = true, default_values_t = [0.0, 26.0, 50.0])]
    eye: Vec<f32>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match args.config {
        Some(ref path) => Config::load(path)?,
        None => Config::default(),
    };
    parallax_tracker::init_tracing(&config.log.filter);

    let screen = Screen::from_config(&config.screen).context("Screen corners must span a rectangle")?;
    let eye = Point3::new(args.eye[0], args.eye[1], args.eye[2]);

    let extents = screen.extents(&eye);
    let projection = screen.projection_for(&eye);

    println!("Projection Probe ({})", env!("GIT_VERSION"));
    println!("Screen: {:.1} x {:.1}, center {:?}", screen.width(), screen.height(), screen.center());
    println!("Eye: ({}, {}, {})", eye.x, eye.y, eye.z);
    println!("Distance to screen: {:.3}", extents.distance);
    println!(
        "Frustum: l={:.4} r={:.4} b={:.4} t={:.4} n={} f={}",
        extents.left, extents.right, extents.bottom, extents.top, extents.near, extents.far
    );
    println!("Projection:{}", projection);

    let clip = projection * screen.center().to_homogeneous();
    if clip.w.abs() > f32::EPSILON {
        println!(
            "Screen center in NDC: ({:.4}, {:.4}, {:.4})",
            clip.x / clip.w,
            clip.y / clip.w,
            clip.z / clip.w
        );
    } else {
        println!("Screen center is on the eye plane");
    }

    Ok(())
}
