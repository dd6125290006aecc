//! Contract for the external geophysical data provider: point queries for
//! weather, ocean, waves, geo-water, compass declination and celestial
//! positions. The engine only ever reads through this interface; real
//! implementations backed by gridded data files live outside this crate.

use crate::geo::{GeoPos, GeoVec};

/// The Sun's celestial object id.
pub const CELESTIAL_OBJ_SUN: i32 = 0;
/// The last navigational star id; star ids run from 1 up to and including
/// Polaris.
pub const CELESTIAL_OBJ_POLARIS: i32 = 57;

/// Point weather sample.
#[derive(Debug, Clone, Copy)]
pub struct Weather {
    /// Wind vector (bearing the wind blows from, magnitude in m/s).
    pub wind: GeoVec,
    /// Wind gust magnitude in m/s.
    pub wind_gust: f64,
    /// Air temperature in degrees Celsius.
    pub temp: f64,
    /// Dewpoint in degrees Celsius.
    pub dewpoint: f64,
    /// Surface pressure in hPa.
    pub pressure: f64,
    /// Cloud cover percentage in [0, 100].
    pub cloud: f64,
    /// Visibility in metres.
    pub visibility: f64,
    /// Precipitation rate in mm/h.
    pub precip_rate: f64,
    /// Precipitation condition code (opaque to the engine; logged as-is).
    pub cond: i32,
}

impl Weather {
    /// Adjusts the wind and wind-gust vectors for an ocean current: both get
    /// the current vector added, the gust keeps the sum's magnitude, and the
    /// gust vector's new bearing is returned.
    pub fn adjust_for_current(&mut self, current: &GeoVec) -> f64 {
        let mut gust = GeoVec::new(self.wind.angle, self.wind_gust);

        self.wind.add(current);

        gust.add(current);
        self.wind_gust = gust.mag;

        gust.angle
    }
}

/// Point ocean sample; only returned where ocean data exists.
#[derive(Debug, Clone, Copy)]
pub struct OceanData {
    /// Surface current vector (bearing the water flows toward, m/s).
    pub current: GeoVec,
    /// Sea surface temperature in degrees Celsius.
    pub surface_temp: f64,
    /// Surface salinity in g/kg.
    pub salinity: f64,
    /// Sea ice concentration percentage in [0, 100].
    pub ice: f64,
}

/// Point wave sample; only returned where wave data exists.
#[derive(Debug, Clone, Copy)]
pub struct WaveData {
    /// Significant wave height in metres.
    pub height: f64,
}

/// Horizontal (observer-relative) celestial coordinates in degrees.
#[derive(Debug, Clone, Copy)]
pub struct HorizontalCoord {
    pub az: f64,
    pub alt: f64,
}

/// Read-only point-query service for all geophysical inputs.
///
/// Implementations must be thread-safe: the simulation thread and every
/// server worker query concurrently. Each call returns a fresh value; the
/// engine never caches samples across ticks.
pub trait Environment: Send + Sync {
    fn weather(&self, pos: &GeoPos) -> Weather;

    /// `None` where no ocean data is available (inland, missing grids).
    fn ocean(&self, pos: &GeoPos) -> Option<OceanData>;

    /// `None` where no wave data is available.
    fn wave(&self, pos: &GeoPos) -> Option<WaveData>;

    /// Whether the position is on water according to the geo dataset.
    fn is_water(&self, pos: &GeoPos) -> bool;

    /// Magnetic declination in degrees at a position and wall-clock time.
    fn magnetic_declination(&self, pos: &GeoPos, unix_secs: i64) -> f64;

    /// Apparent horizontal coordinates of a celestial object, with
    /// atmospheric refraction for the given pressure and temperature.
    /// `None` when the object cannot be resolved.
    fn celestial_horizontal(
        &self,
        unix_secs: i64,
        pos: &GeoPos,
        object: i32,
        pressure: f64,
        temp: f64,
    ) -> Option<HorizontalCoord>;
}

/// A uniform-conditions environment: the same weather, ocean and wave data
/// at every point of an all-water (or all-land) planet. The binary falls
/// back to it when no data-backed provider is wired in, and the test suites
/// use it to pin down physics behaviour.
#[derive(Debug, Clone)]
pub struct StaticEnvironment {
    pub weather: Weather,
    pub ocean: Option<OceanData>,
    pub wave: Option<WaveData>,
    pub water_everywhere: bool,
    pub magdec: f64,
    pub sun_az: f64,
    pub sun_alt: f64,
}

impl StaticEnvironment {
    /// Calm open ocean: no wind, no current, no waves, no declination.
    pub fn calm() -> Self {
        StaticEnvironment {
            weather: Weather {
                wind: GeoVec::zero(),
                wind_gust: 0.0,
                temp: 15.0,
                dewpoint: 10.0,
                pressure: 1013.0,
                cloud: 0.0,
                visibility: 20_000.0,
                precip_rate: 0.0,
                cond: 0,
            },
            ocean: None,
            wave: None,
            water_everywhere: true,
            magdec: 0.0,
            sun_az: 180.0,
            sun_alt: 45.0,
        }
    }

    pub fn with_wind(mut self, angle: f64, mag: f64) -> Self {
        self.weather.wind = GeoVec::new(angle, mag);
        self
    }

    pub fn with_gust(mut self, gust: f64) -> Self {
        self.weather.wind_gust = gust;
        self
    }

    pub fn with_ocean(mut self, ocean: OceanData) -> Self {
        self.ocean = Some(ocean);
        self
    }

    pub fn with_wave(mut self, height: f64) -> Self {
        self.wave = Some(WaveData { height });
        self
    }

    pub fn with_cloud(mut self, cloud: f64) -> Self {
        self.weather.cloud = cloud;
        self
    }

    pub fn with_land_everywhere(mut self) -> Self {
        self.water_everywhere = false;
        self
    }

    pub fn with_magdec(mut self, magdec: f64) -> Self {
        self.magdec = magdec;
        self
    }

    pub fn with_sun(mut self, az: f64, alt: f64) -> Self {
        self.sun_az = az;
        self.sun_alt = alt;
        self
    }
}

impl Environment for StaticEnvironment {
    fn weather(&self, _pos: &GeoPos) -> Weather {
        self.weather
    }

    fn ocean(&self, _pos: &GeoPos) -> Option<OceanData> {
        self.ocean
    }

    fn wave(&self, _pos: &GeoPos) -> Option<WaveData> {
        self.wave
    }

    fn is_water(&self, _pos: &GeoPos) -> bool {
        self.water_everywhere
    }

    fn magnetic_declination(&self, _pos: &GeoPos, _unix_secs: i64) -> f64 {
        self.magdec
    }

    fn celestial_horizontal(
        &self,
        _unix_secs: i64,
        _pos: &GeoPos,
        object: i32,
        _pressure: f64,
        _temp: f64,
    ) -> Option<HorizontalCoord> {
        if object == CELESTIAL_OBJ_SUN {
            Some(HorizontalCoord { az: self.sun_az, alt: self.sun_alt })
        } else {
            // Stars spread around the sky, all above the horizon.
            Some(HorizontalCoord { az: f64::from(object) * 6.0 % 360.0, alt: 30.0 })
        }
    }
}
