use nalgebra as na;
use opencv::{
    core::{self, Mat, Point, Size, Vector},
    imgproc,
    prelude::*,
};
use serde_derive::Deserialize;

use crate::bbox::{BBox, Ltwh};
use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CrossingLocatorConfig {
    /// Neighbourhood of the adaptive threshold, odd.
    pub block_size: i32,
    pub threshold_c: f64,
    /// Smallest stripe contour, px²
    pub min_area: f64,
    /// Polygon approximation tolerance as a fraction of the perimeter.
    pub approx_epsilon: f64,
    pub cluster_radius: f32,
    pub erode_iterations: i32,
    pub dilate_iterations: i32,
}

impl Default for CrossingLocatorConfig {
    fn default() -> Self {
        Self {
            block_size: 115,
            threshold_c: 1.0,
            min_area: 800.0,
            approx_epsilon: 0.04,
            cluster_radius: 100.0,
            erode_iterations: 1,
            dilate_iterations: 2,
        }
    }
}

/// Finds the pedestrian crossing from the zebra stripes painted below a
/// traffic light.
pub struct CrossingLocator {
    config: CrossingLocatorConfig,
}

impl CrossingLocator {
    pub fn new(config: CrossingLocatorConfig) -> Self {
        Self { config }
    }

    /// Proposes a crossing region spanning the full frame width, or `None`
    /// when no stripe cluster is found below `light`.
    pub fn locate(&self, frame: &Mat, light: &BBox<Ltwh>) -> Result<Option<BBox<Ltwh>>, Error> {
        if frame.cols() == 0 || frame.rows() == 0 {
            return Ok(None);
        }

        let stripes = self.stripe_candidates(frame, light)?;
        if stripes.is_empty() {
            return Ok(None);
        }

        let centers: Vec<_> = stripes
            .iter()
            .map(|r| na::Point2::new((r.x + r.width / 2) as f32, (r.y + r.height / 2) as f32))
            .collect();

        let clusters = cluster_centers(&centers, self.config.cluster_radius);

        Ok(largest_cluster(&clusters).and_then(|c| span_region(c, frame.cols() as f32)))
    }

    fn binarize(&self, frame: &Mat) -> Result<Mat, Error> {
        let mut gray = Mat::default();
        imgproc::cvt_color(frame, &mut gray, imgproc::COLOR_BGR2GRAY, 0)?;

        let mut binary = Mat::default();
        imgproc::adaptive_threshold(
            &gray,
            &mut binary,
            255.0,
            imgproc::ADAPTIVE_THRESH_GAUSSIAN_C,
            imgproc::THRESH_BINARY,
            self.config.block_size,
            self.config.threshold_c,
        )?;

        let kernel = imgproc::get_structuring_element(
            imgproc::MORPH_RECT,
            Size::new(3, 3),
            Point::new(-1, -1),
        )?;
        let border = imgproc::morphology_default_border_value()?;

        let mut eroded = Mat::default();
        imgproc::erode(
            &binary,
            &mut eroded,
            &kernel,
            Point::new(-1, -1),
            self.config.erode_iterations,
            core::BORDER_CONSTANT,
            border,
        )?;

        let mut dilated = Mat::default();
        imgproc::dilate(
            &eroded,
            &mut dilated,
            &kernel,
            Point::new(-1, -1),
            self.config.dilate_iterations,
            core::BORDER_CONSTANT,
            border,
        )?;

        Ok(dilated)
    }

    /// Bounding boxes of quadrilateral contours lying strictly below `light`.
    fn stripe_candidates(&self, frame: &Mat, light: &BBox<Ltwh>) -> Result<Vec<core::Rect>, Error> {
        let binary = self.binarize(frame)?;

        let mut contours = Vector::<Vector<Point>>::new();
        imgproc::find_contours(
            &binary,
            &mut contours,
            imgproc::RETR_TREE,
            imgproc::CHAIN_APPROX_SIMPLE,
            Point::new(0, 0),
        )?;

        let mut stripes = Vec::new();
        for contour in contours.iter() {
            if imgproc::contour_area(&contour, false)? <= self.config.min_area {
                continue;
            }

            let perimeter = imgproc::arc_length(&contour, true)?;
            let mut approx = Vector::<Point>::new();
            imgproc::approx_poly_dp(
                &contour,
                &mut approx,
                self.config.approx_epsilon * perimeter,
                true,
            )?;

            if approx.len() != 4 {
                continue;
            }

            let rect = imgproc::bounding_rect(&contour)?;
            if rect.y as f32 > light.bottom() {
                stripes.push(rect);
            }
        }

        Ok(stripes)
    }
}

/// Greedy single-link clustering: a point joins the first cluster whose
/// every member lies closer than `radius`, otherwise it starts a new one.
pub fn cluster_centers(points: &[na::Point2<f32>], radius: f32) -> Vec<Vec<na::Point2<f32>>> {
    let mut clusters: Vec<Vec<na::Point2<f32>>> = Vec::new();

    for p in points {
        let joined = clusters
            .iter_mut()
            .find(|cluster| cluster.iter().all(|m| na::distance(m, p) < radius));

        match joined {
            Some(cluster) => cluster.push(*p),
            None => clusters.push(vec![*p]),
        }
    }

    clusters
}

/// The cluster with most members, the earliest one on ties.
pub fn largest_cluster(clusters: &[Vec<na::Point2<f32>>]) -> Option<&[na::Point2<f32>]> {
    let mut best: Option<&Vec<na::Point2<f32>>> = None;

    for cluster in clusters {
        if best.map_or(true, |b| cluster.len() > b.len()) {
            best = Some(cluster);
        }
    }

    best.map(|c| c.as_slice())
}

fn span_region(cluster: &[na::Point2<f32>], frame_width: f32) -> Option<BBox<Ltwh>> {
    let min_y = cluster.iter().map(|p| p.y).reduce(f32::min)?;
    let max_y = cluster.iter().map(|p| p.y).reduce(f32::max)?;

    Some(BBox::ltwh(0.0, min_y, frame_width, max_y - min_y))
}
