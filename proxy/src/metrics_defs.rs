use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUESTS_ROUTED: MetricDef = MetricDef {
    name: "requests.routed",
    metric_type: MetricType::Counter,
    description: "Requests dispatched to a service route",
};

pub const REQUESTS_ENDPOINT: MetricDef = MetricDef {
    name: "requests.endpoint",
    metric_type: MetricType::Counter,
    description: "Requests addressed to an individual pod under /endpoint/",
};

pub const REQUESTS_UNMATCHED: MetricDef = MetricDef {
    name: "requests.unmatched",
    metric_type: MetricType::Counter,
    description: "Requests that matched no route and went to the default handler",
};

pub const UPSTREAM_ERRORS: MetricDef = MetricDef {
    name: "upstream.errors",
    metric_type: MetricType::Counter,
    description: "Backend requests that failed before a response was received",
};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Time until backend response headers arrived, in seconds",
};

pub const WATCH_EVENTS: MetricDef = MetricDef {
    name: "watch.events",
    metric_type: MetricType::Counter,
    description: "Service and Endpoints change events applied to the registry",
};

pub const WATCH_RESTARTS: MetricDef = MetricDef {
    name: "watch.restarts",
    metric_type: MetricType::Counter,
    description: "Attempts to re-open the service and endpoints watches",
};

pub const ROUTES_CONFLICTS: MetricDef = MetricDef {
    name: "routes.conflicts",
    metric_type: MetricType::Counter,
    description: "Route installs that landed on a path already claimed by another service",
};

pub const ROUTES_ACTIVE: MetricDef = MetricDef {
    name: "routes.active",
    metric_type: MetricType::Gauge,
    description: "Number of distinct routed paths",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUESTS_ROUTED,
    REQUESTS_ENDPOINT,
    REQUESTS_UNMATCHED,
    UPSTREAM_ERRORS,
    REQUEST_DURATION,
    WATCH_EVENTS,
    WATCH_RESTARTS,
    ROUTES_CONFLICTS,
    ROUTES_ACTIVE,
];
