//! Six-point perspective-n-point solve for head pose.
//!
//! Camera convention: x right, y down, z away from the camera. The model face
//! looks at the camera when the rotation is identity.

use nalgebra::{Matrix6, Rotation3, SMatrix, SVector, Vector2, Vector3, Vector6};

/// Generic face model in millimetres: nose tip, chin, left/right outer eye
/// corner, left/right mouth corner ("left" is image left).
pub const MODEL_POINTS: [[f64; 3]; 6] = [
    [0.0, 0.0, 0.0],
    [0.0, 330.0, 65.0],
    [-225.0, -170.0, 135.0],
    [225.0, -170.0, 135.0],
    [-150.0, 150.0, 125.0],
    [150.0, 150.0, 125.0],
];

const MAX_ITERATIONS: usize = 100;
const MIN_IMAGE_SPAN_PX: f64 = 1.0;

type Residuals = SVector<f64, 12>;
type Jacobian = SMatrix<f64, 12, 6>;

/// Pinhole intrinsics without distortion.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraIntrinsics {
    pub focal: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Focal length equal to the frame width, principal point at the centre.
    pub fn for_frame(width: u32, height: u32) -> Self {
        Self {
            focal: width as f64,
            cx: width as f64 / 2.0,
            cy: height as f64 / 2.0,
        }
    }

    pub fn project(&self, point: &Vector3<f64>) -> Option<Vector2<f64>> {
        if !(point.z > f64::EPSILON) {
            return None;
        }
        Some(Vector2::new(
            self.focal * point.x / point.z + self.cx,
            self.focal * point.y / point.z + self.cy,
        ))
    }
}

#[derive(Clone, Debug)]
pub struct PnpSolution {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
    /// Root-mean-square reprojection error in pixels.
    pub rms_error: f64,
    pub iterations: usize,
}

impl PnpSolution {
    pub fn euler_degrees(&self) -> (f64, f64, f64) {
        euler_degrees(&self.rotation)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PnpFailure {
    NonFinite,
    Degenerate,
    BehindCamera,
    NoConvergence,
}

impl std::fmt::Display for PnpFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            PnpFailure::NonFinite => "non-finite correspondence or solution",
            PnpFailure::Degenerate => "degenerate correspondences",
            PnpFailure::BehindCamera => "model point behind camera",
            PnpFailure::NoConvergence => "solver did not converge",
        };
        f.write_str(msg)
    }
}

/// Yaw, pitch and roll in degrees.
///
/// Positive yaw turns the nose towards image right, positive pitch towards
/// image down.
pub fn euler_degrees(rotation: &Rotation3<f64>) -> (f64, f64, f64) {
    let m = rotation.matrix();
    let forward: Vector3<f64> = -m.column(2).into_owned();
    let yaw = forward.x.atan2(-forward.z);
    let pitch = forward
        .y
        .atan2((forward.x * forward.x + forward.z * forward.z).sqrt());
    let roll = m[(1, 0)].atan2(m[(0, 0)]);
    (yaw.to_degrees(), pitch.to_degrees(), roll.to_degrees())
}

fn model() -> [Vector3<f64>; 6] {
    MODEL_POINTS.map(|p| Vector3::new(p[0], p[1], p[2]))
}

fn pose_from(params: &Vector6<f64>) -> (Rotation3<f64>, Vector3<f64>) {
    let rotation = Rotation3::from_scaled_axis(Vector3::new(params[0], params[1], params[2]));
    (rotation, Vector3::new(params[3], params[4], params[5]))
}

fn residuals(
    params: &Vector6<f64>,
    model: &[Vector3<f64>; 6],
    image: &[Vector2<f64>; 6],
    camera: &CameraIntrinsics,
) -> Option<Residuals> {
    let (rotation, translation) = pose_from(params);
    let mut out = Residuals::zeros();
    for (i, (object, observed)) in model.iter().zip(image.iter()).enumerate() {
        let projected = camera.project(&(rotation * object + translation))?;
        out[2 * i] = projected.x - observed.x;
        out[2 * i + 1] = projected.y - observed.y;
    }
    Some(out)
}

fn jacobian(
    params: &Vector6<f64>,
    model: &[Vector3<f64>; 6],
    image: &[Vector2<f64>; 6],
    camera: &CameraIntrinsics,
) -> Option<Jacobian> {
    let mut jac = Jacobian::zeros();
    for j in 0..6 {
        let step = 1e-6 * params[j].abs().max(1.0);
        let mut forward = *params;
        let mut backward = *params;
        forward[j] += step;
        backward[j] -= step;
        let diff = (residuals(&forward, model, image, camera)?
            - residuals(&backward, model, image, camera)?)
            / (2.0 * step);
        jac.set_column(j, &diff);
    }
    Some(jac)
}

fn initial_guess(
    model: &[Vector3<f64>; 6],
    image: &[Vector2<f64>; 6],
    camera: &CameraIntrinsics,
) -> Result<Vector6<f64>, PnpFailure> {
    let image_centroid = image.iter().fold(Vector2::<f64>::zeros(), |acc, p| acc + p) / 6.0;
    let model_centroid = model.iter().fold(Vector3::<f64>::zeros(), |acc, p| acc + p) / 6.0;
    let image_span = (image
        .iter()
        .map(|p| (p - image_centroid).norm_squared())
        .sum::<f64>()
        / 6.0)
        .sqrt();
    if image_span < MIN_IMAGE_SPAN_PX {
        return Err(PnpFailure::Degenerate);
    }
    let model_span = (model
        .iter()
        .map(|p| (p.xy() - model_centroid.xy()).norm_squared())
        .sum::<f64>()
        / 6.0)
        .sqrt();

    let depth = camera.focal * model_span / image_span;
    let tz = depth - model_centroid.z;
    let tx = (image_centroid.x - camera.cx) * depth / camera.focal - model_centroid.x;
    let ty = (image_centroid.y - camera.cy) * depth / camera.focal - model_centroid.y;
    Ok(Vector6::new(0.0, 0.0, 0.0, tx, ty, tz))
}

/// Solve the pose of `MODEL_POINTS` given their image positions in pixels.
///
/// Levenberg–Marquardt on a rotation vector plus translation, starting from
/// a frontal pose at the depth implied by the image scale.
pub fn solve(image: &[Vector2<f64>; 6], camera: &CameraIntrinsics) -> Result<PnpSolution, PnpFailure> {
    if image.iter().any(|p| !p.x.is_finite() || !p.y.is_finite())
        || !camera.focal.is_finite()
        || camera.focal <= 0.0
    {
        return Err(PnpFailure::NonFinite);
    }
    let model = model();
    let mut params = initial_guess(&model, image, camera)?;
    let mut current =
        residuals(&params, &model, image, camera).ok_or(PnpFailure::BehindCamera)?;
    let mut cost = current.norm_squared();
    let mut lambda = 1e-3;
    let mut iterations = 0;

    while iterations < MAX_ITERATIONS {
        iterations += 1;
        let jac = jacobian(&params, &model, image, camera).ok_or(PnpFailure::BehindCamera)?;
        let jtj: Matrix6<f64> = jac.transpose() * jac;
        let gradient: Vector6<f64> = jac.transpose() * current;
        if gradient.amax() < 1e-12 {
            break;
        }

        let mut damped = jtj;
        for d in 0..6 {
            damped[(d, d)] += lambda * jtj[(d, d)].max(1e-9);
        }
        let step = match damped.lu().solve(&(-gradient)) {
            Some(step) => step,
            None => {
                lambda *= 10.0;
                continue;
            }
        };

        let candidate = params + step;
        match residuals(&candidate, &model, image, camera) {
            Some(next) if next.norm_squared() < cost => {
                let improvement = cost - next.norm_squared();
                params = candidate;
                current = next;
                cost = current.norm_squared();
                lambda = (lambda / 10.0).max(1e-12);
                if step.norm() < 1e-10 || improvement < 1e-12 * cost.max(1.0) {
                    break;
                }
            }
            _ => {
                lambda *= 10.0;
                if lambda > 1e12 {
                    break;
                }
            }
        }
    }

    let (rotation, translation) = pose_from(&params);
    if !params.iter().all(|v| v.is_finite()) || !cost.is_finite() {
        return Err(PnpFailure::NonFinite);
    }
    if model.iter().any(|p| (rotation * p + translation).z <= 0.0) {
        return Err(PnpFailure::BehindCamera);
    }
    let rms_error = (cost / 6.0).sqrt();
    let image_scale = image
        .iter()
        .map(|p| (p - image[0]).norm())
        .fold(0.0_f64, f64::max);
    if rms_error > 0.25 * image_scale {
        return Err(PnpFailure::NoConvergence);
    }
    Ok(PnpSolution {
        rotation,
        translation,
        rms_error,
        iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_view(yaw_deg: f64, pitch_deg: f64, camera: &CameraIntrinsics) -> [Vector2<f64>; 6] {
        let rotation = Rotation3::from_axis_angle(&Vector3::y_axis(), -yaw_deg.to_radians())
            * Rotation3::from_axis_angle(&Vector3::x_axis(), pitch_deg.to_radians());
        let translation = Vector3::new(40.0, -25.0, 3000.0);
        model().map(|p| camera.project(&(rotation * p + translation)).unwrap())
    }

    #[test]
    fn euler_convention_matches_constructed_rotation() {
        let rotation = Rotation3::from_axis_angle(&Vector3::y_axis(), -(15f64).to_radians())
            * Rotation3::from_axis_angle(&Vector3::x_axis(), (-8f64).to_radians());
        let (yaw, pitch, _) = euler_degrees(&rotation);
        assert!((yaw - 15.0).abs() < 1e-9);
        assert!((pitch + 8.0).abs() < 1e-9);
    }

    #[test]
    fn recovers_known_pose_within_one_degree() {
        let camera = CameraIntrinsics::for_frame(640, 480);
        for (yaw, pitch) in [(0.0, 0.0), (20.0, -5.0), (-12.0, 14.0), (8.0, 25.0)] {
            let image = synthetic_view(yaw, pitch, &camera);
            let solution = solve(&image, &camera).unwrap();
            let (got_yaw, got_pitch, _) = solution.euler_degrees();
            assert!((got_yaw - yaw).abs() < 1.0, "yaw {} vs {}", got_yaw, yaw);
            assert!((got_pitch - pitch).abs() < 1.0, "pitch {} vs {}", got_pitch, pitch);
            assert!(solution.rms_error < 0.5);
        }
    }

    #[test]
    fn positive_yaw_moves_nose_right_of_eyes() {
        let camera = CameraIntrinsics::for_frame(640, 480);
        let image = synthetic_view(20.0, 0.0, &camera);
        let eye_mid = (image[2].x + image[3].x) / 2.0;
        assert!(image[0].x > eye_mid);
    }

    #[test]
    fn collapsed_points_are_degenerate() {
        let camera = CameraIntrinsics::for_frame(640, 480);
        let image = [Vector2::new(320.0, 240.0); 6];
        assert_eq!(solve(&image, &camera).unwrap_err(), PnpFailure::Degenerate);
    }

    #[test]
    fn non_finite_points_fail() {
        let camera = CameraIntrinsics::for_frame(640, 480);
        let mut image = synthetic_view(0.0, 0.0, &camera);
        image[1].y = f64::NAN;
        assert_eq!(solve(&image, &camera).unwrap_err(), PnpFailure::NonFinite);
    }
}
