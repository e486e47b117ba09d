use opencv::{core, highgui, prelude::*, videoio};
use qstab::{cv, NoopPresenter, Rect, StabilizerConfig};

const USAGE: &str = "usage: stabilize <input> <output> <config.json | local x y w h | global [shift_x shift_y] | perspective x y w h> [--nogui]";

fn select_roi(path: &str) -> Result<Rect, qstab::Error> {
    let mut cam = videoio::VideoCapture::from_file(path, videoio::CAP_ANY)?;
    let mut frame = core::Mat::default();
    if !cam.read(&mut frame)? {
        return Err(qstab::Error::EmptySource);
    }

    let window = "Select a ROI and ENTER";
    let r = highgui::select_roi(window, &frame, true, false)?;
    highgui::destroy_window(window)?;

    Ok(Rect::ltwh(r.x, r.y, r.width.max(0) as u32, r.height.max(0) as u32))
}

fn parse_roi(args: &[String], input: &str) -> Result<Rect, qstab::Error> {
    if args.len() < 4 {
        return select_roi(input);
    }

    let v: Vec<i64> = args[..4]
        .iter()
        .map(|a| a.parse().expect("roi values must be integers"))
        .collect();

    Ok(Rect::ltwh(v[0] as i32, v[1] as i32, v[2].max(0) as u32, v[3].max(0) as u32))
}

fn main() -> Result<(), qstab::Error> {
    let _logger = qstab::logging::setup_logging("info")?;

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let nogui = args.iter().any(|a| a == "--nogui");
    args.retain(|a| a != "--nogui");

    if args.len() < 3 {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    }

    let input = args[0].clone();
    let output = args[1].clone();
    let rest = &args[3..];

    let config = match args[2].as_str() {
        "local" => StabilizerConfig::local(parse_roi(rest, &input)?),
        "perspective" => StabilizerConfig::perspective(parse_roi(rest, &input)?),
        "global" => {
            let shift = |i: usize| rest.get(i).map_or(0, |s| s.parse().expect("shift must be a whole number of pixels"));
            StabilizerConfig::global(shift(0), shift(1))
        }
        path => StabilizerConfig::from_json_file(path)?,
    };

    let summary = if nogui {
        cv::stabilize_file(&input, &output, config, NoopPresenter)?
    } else {
        let presenter = cv::WindowPresenter::new("Converting...", 1)?;
        cv::stabilize_file(&input, &output, config, presenter)?
    };

    println!(
        "{} frames written to {}, {} stalled steps (longest {})",
        summary.frames_written, output, summary.stalls, summary.longest_stall
    );

    Ok(())
}
