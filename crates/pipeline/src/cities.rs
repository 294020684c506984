/// A city tracked by the pipeline, with the coordinates sent to the weather API.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct City {
    pub code: &'static str,
    pub latitude: f64,
    pub longitude: f64,
}

/// Fixed city roster; every fetch run covers exactly these cities.
pub const CITY_ROSTER: &[City] = &[
    City {
        code: "BUE",
        latitude: -34.61,
        longitude: -58.38,
    },
    City {
        code: "SCL",
        latitude: -33.45,
        longitude: -70.66,
    },
    City {
        code: "MAD",
        latitude: 40.42,
        longitude: -3.70,
    },
    City {
        code: "MIA",
        latitude: 25.76,
        longitude: -80.19,
    },
];
