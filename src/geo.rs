//! WGS84 <-> UTM projection and ground-footprint geometry (§4.1.4).
//!
//! No GDAL/PROJ binding is part of this crate's dependency stack, so the
//! forward/inverse transverse Mercator formulas are implemented directly
//! against the WGS84 ellipsoid. The math is self-contained; UTM-zone
//! selection below handles the Norway/Svalbard band exceptions.

use std::f64::consts::PI;

/// WGS84 ellipsoid semi-major axis (meters).
const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening.
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING: f64 = 10_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtmZone {
    pub zone: i32,
    pub north: bool,
}

fn ang_normalize(x: f64) -> f64 {
    let mut x = x % 360.0;
    if x < -180.0 {
        x += 360.0;
    } else if x >= 180.0 {
        x -= 360.0;
    }
    if x == -180.0 {
        180.0
    } else {
        x
    }
}

fn latitude_band(latitude: f64) -> i32 {
    let ilat = latitude.floor() as i32;
    ((ilat + 80) / 8 - 10).clamp(-10, 9)
}

/// Standard UTM zone number + hemisphere for a WGS84 coordinate, including
/// the Norway/Svalbard exceptions the original carries.
pub fn standard_utm_zone(latitude: f64, longitude: f64) -> UtmZone {
    let mut ilon = ang_normalize(longitude).floor() as i32;
    if ilon == 180 {
        ilon = -180;
    }
    let mut zone = (ilon + 186) / 6;
    let band = latitude_band(latitude);
    if band == 7 && zone == 31 && ilon >= 3 {
        zone = 32; // Norway exception
    } else if band == 9 && (0..42).contains(&ilon) {
        zone = 2 * ((ilon + 183) / 12) + 1; // Svalbard exception
    }
    UtmZone {
        zone,
        north: latitude >= 0.0,
    }
}

/// Projects a WGS84 coordinate to UTM meters within `zone`.
pub fn to_utm(latitude: f64, longitude: f64, zone: UtmZone) -> (f64, f64) {
    let a = WGS84_A;
    let f = WGS84_F;
    let e2 = f * (2.0 - f);
    let ep2 = e2 / (1.0 - e2);

    let lat = latitude.to_radians();
    let lon0 = ((zone.zone as f64 - 1.0) * 6.0 - 180.0 + 3.0).to_radians();
    let lon = longitude.to_radians();

    let n = a / (1.0 - e2 * lat.sin().powi(2)).sqrt();
    let t = lat.tan().powi(2);
    let c = ep2 * lat.cos().powi(2);
    let ax = (lon - lon0) * lat.cos();

    let m = a
        * ((1.0 - e2 / 4.0 - 3.0 * e2 * e2 / 64.0 - 5.0 * e2.powi(3) / 256.0) * lat
            - (3.0 * e2 / 8.0 + 3.0 * e2 * e2 / 32.0 + 45.0 * e2.powi(3) / 1024.0)
                * (2.0 * lat).sin()
            + (15.0 * e2 * e2 / 256.0 + 45.0 * e2.powi(3) / 1024.0) * (4.0 * lat).sin()
            - (35.0 * e2.powi(3) / 3072.0) * (6.0 * lat).sin());

    let easting = UTM_K0
        * n
        * (ax
            + (1.0 - t + c) * ax.powi(3) / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * ax.powi(5) / 120.0)
        + UTM_FALSE_EASTING;

    let mut northing = UTM_K0
        * (m + n
            * lat.tan()
            * (ax.powi(2) / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * ax.powi(4) / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * ax.powi(6) / 720.0));

    if !zone.north {
        northing += UTM_FALSE_NORTHING;
    }

    (easting, northing)
}

/// Inverse-projects a UTM (easting, northing) pair back to WGS84 lat/lon.
pub fn from_utm(easting: f64, northing: f64, zone: UtmZone) -> (f64, f64) {
    let a = WGS84_A;
    let f = WGS84_F;
    let e2 = f * (2.0 - f);
    let ep2 = e2 / (1.0 - e2);
    let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());

    let x = easting - UTM_FALSE_EASTING;
    let y = if zone.north {
        northing
    } else {
        northing - UTM_FALSE_NORTHING
    };

    let m = y / UTM_K0;
    let mu = m
        / (a * (1.0 - e2 / 4.0 - 3.0 * e2 * e2 / 64.0 - 5.0 * e2.powi(3) / 256.0));

    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin();

    let n1 = a / (1.0 - e2 * phi1.sin().powi(2)).sqrt();
    let t1 = phi1.tan().powi(2);
    let c1 = ep2 * phi1.cos().powi(2);
    let r1 = a * (1.0 - e2) / (1.0 - e2 * phi1.sin().powi(2)).powf(1.5);
    let d = x / (n1 * UTM_K0);

    let lat = phi1
        - (n1 * phi1.tan() / r1)
            * (d * d / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                    * d.powi(6)
                    / 720.0);

    let lon0 = ((zone.zone as f64 - 1.0) * 6.0 - 180.0 + 3.0).to_radians();
    let lon = lon0
        + (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1)
                * d.powi(5)
                / 120.0)
            / phi1.cos();

    (lat.to_degrees(), lon.to_degrees())
}

fn rotate(point: (f64, f64), center: (f64, f64), degrees: f64) -> (f64, f64) {
    let rad = degrees.to_radians();
    let (dx, dy) = (point.0 - center.0, point.1 - center.1);
    (
        center.0 + dx * rad.cos() - dy * rad.sin(),
        center.1 + dx * rad.sin() + dy * rad.cos(),
    )
}

/// Camera pose inputs to [`calculate_footprint`], named after the original's
/// `CameraOrientation`/`GeoLocation`/`Focal`/`SensorSize` aggregates.
#[derive(Debug, Clone, Copy)]
pub struct FootprintInput {
    pub sensor_width: f64,
    pub sensor_height: f64,
    pub focal_length: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
    pub relative_altitude: f64,
}

/// Computes the five-point ground footprint polygon `(ul, ll, lr, ur, ul)` in
/// WGS84 (lon, lat, alt) for a GeoImage, per §4.1.4.
pub fn calculate_footprint(input: &FootprintInput) -> Vec<(f64, f64, f64)> {
    let zone = standard_utm_zone(input.latitude, input.longitude);
    let center = to_utm(input.latitude, input.longitude, zone);

    let ground_height = if input.altitude != 0.0 {
        input.altitude - input.relative_altitude
    } else {
        input.relative_altitude
    };

    let x_view = 2.0 * (input.sensor_width / (2.0 * input.focal_length)).atan();
    let y_view = 2.0 * (input.sensor_height / (2.0 * input.focal_length)).atan();

    let mut pitch = input.pitch;
    if pitch > -30.0 {
        pitch = -90.0; // pitch cap exceeded: assume nadir
    }

    let rel_alt = input.relative_altitude;
    let bottom = rel_alt * ((90.0 + pitch).to_radians() - 0.5 * y_view).tan();
    let top = rel_alt * ((90.0 + pitch).to_radians() + 0.5 * y_view).tan();
    let left = rel_alt * (input.roll.to_radians() - 0.5 * x_view).tan();
    let right = rel_alt * (input.roll.to_radians() + 0.5 * x_view).tan();

    let upper_left = (center.0 + left, center.1 + top);
    let upper_right = (center.0 + right, center.1 + top);
    let lower_left = (center.0 + left, center.1 + bottom);
    let lower_right = (center.0 + right, center.1 + bottom);

    let neg_yaw = -input.yaw;
    let ul = rotate(upper_left, center, neg_yaw);
    let ur = rotate(upper_right, center, neg_yaw);
    let ll = rotate(lower_left, center, neg_yaw);
    let lr = rotate(lower_right, center, neg_yaw);

    let ul_g = from_utm(ul.0, ul.1, zone);
    let ll_g = from_utm(ll.0, ll.1, zone);
    let lr_g = from_utm(lr.0, lr.1, zone);
    let ur_g = from_utm(ur.0, ur.1, zone);

    vec![
        (ul_g.1, ul_g.0, ground_height),
        (ll_g.1, ll_g.0, ground_height),
        (lr_g.1, lr_g.0, ground_height),
        (ur_g.1, ur_g.0, ground_height),
        (ul_g.1, ul_g.0, ground_height),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utm_zone_matches_known_points() {
        let z = standard_utm_zone(45.0, 9.0); // Milan, Italy -> zone 32
        assert_eq!(z.zone, 32);
        assert!(z.north);
    }

    #[test]
    fn utm_round_trips_within_tolerance() {
        let lat = 45.4642;
        let lon = 9.1900;
        let zone = standard_utm_zone(lat, lon);
        let (e, n) = to_utm(lat, lon, zone);
        let (lat2, lon2) = from_utm(e, n, zone);
        assert!((lat - lat2).abs() < 1e-6);
        assert!((lon - lon2).abs() < 1e-6);
    }

    #[test]
    fn footprint_emits_closed_five_point_ring() {
        let input = FootprintInput {
            sensor_width: 6.3,
            sensor_height: 4.7,
            focal_length: 4.5,
            latitude: 45.4642,
            longitude: 9.19,
            altitude: 150.0,
            yaw: 0.0,
            pitch: -90.0,
            roll: 0.0,
            relative_altitude: 100.0,
        };
        let ring = calculate_footprint(&input);
        assert_eq!(ring.len(), 5);
        assert_eq!(ring[0], ring[4]);
    }
}
