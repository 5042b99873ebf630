use opencv::{
    core::{self, Mat, Scalar},
    imgproc,
};

use crate::bbox::{BBox, Ltwh};
use crate::detection::{LightColor, ObjectDetection};
use crate::violation::SessionCounters;

const CROSSING_COLOR: (f64, f64, f64) = (255.0, 0.0, 0.0);
const VEHICLE_COLOR: (f64, f64, f64) = (255.0, 255.0, 0.0);

#[inline]
fn bgr((b, g, r): (f64, f64, f64)) -> Scalar {
    Scalar::new(b, g, r, 0.0)
}

fn light_style(color: LightColor) -> ((f64, f64, f64), &'static str) {
    match color {
        LightColor::Green => ((0.0, 255.0, 0.0), "Green"),
        LightColor::Red => ((0.0, 0.0, 255.0), "Red"),
        LightColor::Yellow => ((0.0, 255.0, 255.0), "Yellow"),
    }
}

pub fn draw_box(
    frame: &mut Mat,
    bbox: &BBox<Ltwh>,
    color: Scalar,
    label: Option<&str>,
) -> opencv::Result<()> {
    let rect = core::Rect::new(
        bbox.left() as i32,
        bbox.top() as i32,
        bbox.width() as i32,
        bbox.height() as i32,
    );

    imgproc::rectangle(frame, rect, color, 2, imgproc::LINE_8, 0)?;

    if let Some(label) = label {
        imgproc::put_text(
            frame,
            label,
            core::Point::new(rect.x, rect.y - 10),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.5,
            color,
            2,
            imgproc::LINE_8,
            false,
        )?;
    }

    Ok(())
}

fn draw_counter(frame: &mut Mat, text: &str, y: i32, color: Scalar) -> opencv::Result<()> {
    imgproc::put_text(
        frame,
        text,
        core::Point::new(30, y),
        imgproc::FONT_HERSHEY_SIMPLEX,
        1.0,
        color,
        2,
        imgproc::LINE_AA,
        false,
    )
}

/// Draws the crossing, lights, vehicles and running counters onto `frame`.
pub fn annotate(
    frame: &mut Mat,
    crossing: Option<&BBox<Ltwh>>,
    lights: &[(LightColor, BBox<Ltwh>)],
    vehicles: &[ObjectDetection],
    counters: SessionCounters,
) -> opencv::Result<()> {
    if let Some(crossing) = crossing {
        draw_box(frame, crossing, bgr(CROSSING_COLOR), Some("Crosswalk"))?;
    }

    for (color, bbox) in lights {
        let (rgb, label) = light_style(*color);
        draw_box(frame, bbox, bgr(rgb), Some(label))?;
    }

    for veh in vehicles {
        let label = match veh.identity() {
            Some(id) => format!("{} ID:{}", veh.label, id),
            None => veh.label.clone(),
        };

        draw_box(frame, &veh.ltwh(), bgr(VEHICLE_COLOR), Some(&label))?;
    }

    draw_counter(
        frame,
        &format!("Crossed: {}", counters.total_crossings),
        30,
        bgr((0.0, 255.0, 255.0)),
    )?;
    draw_counter(
        frame,
        &format!("On red: {}", counters.red_light_violations),
        70,
        bgr((0.0, 0.0, 255.0)),
    )?;

    Ok(())
}
