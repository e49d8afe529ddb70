use serde::{Deserialize, Serialize};
use std::fmt;

/// A geographic location in degrees.
///
/// Also used for angular deltas, e.g. the tile size of a level.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}°, {}°)", self.latitude, self.longitude)
    }
}

/// A closed latitude/longitude rectangle in degrees.
///
/// Sectors never wrap around the antimeridian, the minimum longitude is always
/// smaller than or equal to the maximum longitude.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sector {
    min_latitude: f64,
    max_latitude: f64,
    min_longitude: f64,
    max_longitude: f64,
}

impl Default for Sector {
    fn default() -> Self {
        Self::full_sphere()
    }
}

impl Sector {
    /// Creates a new sector from its bounds in degrees.
    ///
    /// # Panics
    /// Panics if a bound is not finite or a minimum exceeds its maximum.
    pub fn new(min_latitude: f64, max_latitude: f64, min_longitude: f64, max_longitude: f64) -> Self {
        assert!(
            min_latitude.is_finite()
                && max_latitude.is_finite()
                && min_longitude.is_finite()
                && max_longitude.is_finite(),
            "Sector bounds must be finite."
        );
        assert!(
            min_latitude <= max_latitude && min_longitude <= max_longitude,
            "Sector minimum exceeds maximum: [{min_latitude}, {max_latitude}] x [{min_longitude}, {max_longitude}]."
        );

        Self {
            min_latitude,
            max_latitude,
            min_longitude,
            max_longitude,
        }
    }

    pub const fn full_sphere() -> Self {
        Self {
            min_latitude: -90.0,
            max_latitude: 90.0,
            min_longitude: -180.0,
            max_longitude: 180.0,
        }
    }

    pub fn min_latitude(&self) -> f64 {
        self.min_latitude
    }

    pub fn max_latitude(&self) -> f64 {
        self.max_latitude
    }

    pub fn min_longitude(&self) -> f64 {
        self.min_longitude
    }

    pub fn max_longitude(&self) -> f64 {
        self.max_longitude
    }

    pub fn delta_latitude(&self) -> f64 {
        self.max_latitude - self.min_latitude
    }

    pub fn delta_longitude(&self) -> f64 {
        self.max_longitude - self.min_longitude
    }

    pub fn centroid(&self) -> Location {
        Location::new(
            0.5 * (self.min_latitude + self.max_latitude),
            0.5 * (self.min_longitude + self.max_longitude),
        )
    }

    /// The corners in the order south west, south east, north west, north east.
    pub fn corners(&self) -> [Location; 4] {
        [
            Location::new(self.min_latitude, self.min_longitude),
            Location::new(self.min_latitude, self.max_longitude),
            Location::new(self.max_latitude, self.min_longitude),
            Location::new(self.max_latitude, self.max_longitude),
        ]
    }

    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        latitude >= self.min_latitude
            && latitude <= self.max_latitude
            && longitude >= self.min_longitude
            && longitude <= self.max_longitude
    }

    /// Whether the two closed rectangles share at least one point.
    /// Sectors touching only along an edge or a corner do intersect.
    pub fn intersects(&self, other: &Sector) -> bool {
        self.min_latitude <= other.max_latitude
            && self.max_latitude >= other.min_latitude
            && self.min_longitude <= other.max_longitude
            && self.max_longitude >= other.min_longitude
    }

    /// Whether the two sectors share a region of non-zero area.
    pub fn overlaps(&self, other: &Sector) -> bool {
        self.min_latitude < other.max_latitude
            && self.max_latitude > other.min_latitude
            && self.min_longitude < other.max_longitude
            && self.max_longitude > other.min_longitude
    }

    pub fn intersection(&self, other: &Sector) -> Option<Sector> {
        self.intersects(other).then(|| Sector {
            min_latitude: self.min_latitude.max(other.min_latitude),
            max_latitude: self.max_latitude.min(other.max_latitude),
            min_longitude: self.min_longitude.max(other.min_longitude),
            max_longitude: self.max_longitude.min(other.max_longitude),
        })
    }

    pub fn union(&self, other: &Sector) -> Sector {
        Sector {
            min_latitude: self.min_latitude.min(other.min_latitude),
            max_latitude: self.max_latitude.max(other.max_latitude),
            min_longitude: self.min_longitude.min(other.min_longitude),
            max_longitude: self.max_longitude.max(other.max_longitude),
        }
    }

    /// Splits the sector at its centroid into the quadrants
    /// south west, south east, north west and north east.
    pub fn subdivide(&self) -> [Sector; 4] {
        let Location {
            latitude: mid_latitude,
            longitude: mid_longitude,
        } = self.centroid();

        [
            Sector::new(self.min_latitude, mid_latitude, self.min_longitude, mid_longitude),
            Sector::new(self.min_latitude, mid_latitude, mid_longitude, self.max_longitude),
            Sector::new(mid_latitude, self.max_latitude, self.min_longitude, mid_longitude),
            Sector::new(mid_latitude, self.max_latitude, mid_longitude, self.max_longitude),
        ]
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}°, {}°] x [{}°, {}°]",
            self.min_latitude, self.max_latitude, self.min_longitude, self.max_longitude
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn subdivision_reproduces_parent() {
        let mut rng = rand::rng();

        for _ in 0..100 {
            let min_latitude = rng.random_range(-90.0..89.0);
            let max_latitude = rng.random_range(min_latitude..90.0);
            let min_longitude = rng.random_range(-180.0..179.0);
            let max_longitude = rng.random_range(min_longitude..180.0);
            let sector = Sector::new(min_latitude, max_latitude, min_longitude, max_longitude);

            let [sw, se, nw, ne] = sector.subdivide();
            assert_eq!(sw.union(&se).union(&nw).union(&ne), sector);

            // neighbouring quadrants share edges but no area
            assert!(sw.intersects(&se) && !sw.overlaps(&se));
            assert!(sw.intersects(&ne) && !sw.overlaps(&ne));
            assert!(nw.intersects(&se) && !nw.overlaps(&se));
            assert_eq!(sw.max_latitude(), nw.min_latitude());
            assert_eq!(sw.max_longitude(), se.min_longitude());
        }
    }

    #[test]
    fn closed_intersection() {
        let a = Sector::new(0.0, 10.0, 0.0, 10.0);
        let b = Sector::new(10.0, 20.0, 5.0, 15.0);
        let c = Sector::new(10.5, 20.0, 5.0, 15.0);

        assert!(a.intersects(&b));
        assert!(!a.overlaps(&b));
        assert!(!a.intersects(&c));
        assert_eq!(a.intersection(&b), Some(Sector::new(10.0, 10.0, 5.0, 10.0)));
        assert_eq!(a.intersection(&c), None);
    }

    #[test]
    fn antimeridian_sectors_do_not_wrap() {
        let west = Sector::new(-10.0, 10.0, -180.0, -170.0);
        let east = Sector::new(-10.0, 10.0, 170.0, 180.0);

        assert!(!west.intersects(&east));
        assert_eq!(west.union(&east).delta_longitude(), 360.0);
    }

    #[test]
    #[should_panic]
    fn inverted_sector_is_rejected() {
        Sector::new(10.0, 0.0, 0.0, 10.0);
    }
}
