pub mod classifier;
pub mod correlation;
pub mod models;
pub mod occupancy;
pub mod polygon;
pub mod spatial;

pub use classifier::{classify, Classification, ControllerType, ControllerTypeProfile};
pub use correlation::{Correlation, CorrelationEngine, CorrelationError, CorrelationSettings};
pub use models::{
    ContactBreakdown, ControllerSession, FlightSession, GeoPoint, InteractionSummary,
    MatchRecord, PositionSample, SampleError, SectorOccupancyRecord, Subject, SubjectKind,
    TimeWindow, TransceiverSample,
};
pub use occupancy::{
    occupancy_seconds_by_sector, OccupancyUpdate, OpenRecordPolicy, SectorTracker, SkipReason,
    TrackOutcome,
};
pub use polygon::{parse_polygon_document, GeometryError, PolygonSet, SectorPolygon};
pub use spatial::{great_circle_distance_nm, point_in_polygon};
