//! Graph params
//!
//! One generic shape, [`GraphParams<N>`], instantiated twice:
//! - [`GraphParamsFrontend`] (`N = String`) for the graph taskpane
//! - [`GraphParamsBackend`] (`N = f64`) for the kernel
//!
//! Only the numeric-like fields change representation; everything else,
//! including fields this module does not know about, is copied as is.

use crate::numbers::{number_to_string, parse_numeric, string_to_number};
use crate::{ExtraFields, ParamCodec};
use serde::{Deserialize, Serialize};

/// Graph identifier, stable for the life of a graph tab
pub type GraphId = String;

/// Graph params as edited in the UI
pub type GraphParamsFrontend = GraphParams<String>;

/// Graph params as executed by the kernel
pub type GraphParamsBackend = GraphParams<f64>;

// Defaults shared with the kernel's graph styling
const DEFAULT_PAPER_BGCOLOR: &str = "#FFFFFF";
const DEFAULT_PLOT_BGCOLOR: &str = "#E6EBF5";
const DEFAULT_TITLE_FONT_COLOR: &str = "#2F3E5D";

/// Supported graph kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GraphType {
    /// Bar chart
    #[default]
    #[serde(rename = "bar")]
    Bar,
    /// Box plot
    #[serde(rename = "box")]
    Box,
    /// Density contour
    #[serde(rename = "density contour")]
    DensityContour,
    /// Density heatmap
    #[serde(rename = "density heatmap")]
    DensityHeatmap,
    /// Empirical cumulative distribution
    #[serde(rename = "ecdf")]
    Ecdf,
    /// Histogram
    #[serde(rename = "histogram")]
    Histogram,
    /// Line chart
    #[serde(rename = "line")]
    Line,
    /// Scatter plot
    #[serde(rename = "scatter")]
    Scatter,
    /// Strip plot
    #[serde(rename = "strip")]
    Strip,
    /// Violin plot
    #[serde(rename = "violin")]
    Violin,
}

impl GraphType {
    fn has_points(self) -> bool {
        matches!(self, Self::Box | Self::Violin)
    }

    fn has_line_shape(self) -> bool {
        matches!(self, Self::Line)
    }

    fn has_histfunc(self) -> bool {
        matches!(self, Self::Histogram)
    }

    fn has_barmode(self) -> bool {
        matches!(self, Self::Bar | Self::Histogram)
    }
}

/// Full graph params, generic over the numeric field representation
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, bound(deserialize = "N: Deserialize<'de> + Default"))]
pub struct GraphParams<N> {
    /// Graph this step configures
    pub graph_id: GraphId,
    /// Data filtering before plotting
    pub graph_preprocessing: GraphPreprocessing,
    /// What is plotted
    pub graph_creation: GraphCreation<N>,
    /// How it looks
    pub graph_styling: GraphStyling<N>,
    /// Unmodelled fields
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Preprocessing options
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphPreprocessing {
    /// Whether the user wants large sheets sampled before plotting
    pub safety_filter_turned_on_by_user: bool,
    /// Unmodelled fields
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Data selection and chart-kind options
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, bound(deserialize = "N: Deserialize<'de> + Default"))]
pub struct GraphCreation<N> {
    pub graph_type: GraphType,
    pub sheet_index: usize,
    pub x_axis_column_ids: Vec<String>,
    pub y_axis_column_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facet_col_column_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facet_row_column_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facet_col_wrap: Option<N>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facet_col_spacing: Option<N>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facet_row_spacing: Option<N>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_shape: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbins: Option<N>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub histnorm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub histfunc: Option<String>,
    /// Unmodelled fields
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Styling options
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, bound(deserialize = "N: Deserialize<'de> + Default"))]
pub struct GraphStyling<N> {
    pub title: TitleStyle,
    pub xaxis: AxisStyle<N>,
    pub yaxis: AxisStyle<N>,
    pub showlegend: bool,
    pub legend: LegendStyle<N>,
    pub paper_bgcolor: String,
    pub plot_bgcolor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barmode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barnorm: Option<String>,
    /// Unmodelled fields
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Graph title
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TitleStyle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub visible: bool,
    pub title_font_color: String,
    /// Unmodelled fields
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// One axis
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, bound(deserialize = "N: Deserialize<'de> + Default"))]
pub struct AxisStyle<N> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub visible: bool,
    pub title_font_color: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub axis_type: Option<String>,
    pub showgrid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gridwidth: Option<N>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rangeslider: Option<RangeSlider>,
    /// Unmodelled fields
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// X axis range slider
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeSlider {
    pub visible: bool,
    /// Unmodelled fields
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Legend placement
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, bound(deserialize = "N: Deserialize<'de> + Default"))]
pub struct LegendStyle<N> {
    pub title: LegendTitle,
    pub orientation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<N>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<N>,
    /// Unmodelled fields
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Legend title
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LegendTitle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Unmodelled fields
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl<N> GraphParams<N> {
    /// Rebuild with every numeric-like field converted by `f`
    pub fn map_numeric<M>(&self, f: &impl Fn(Option<&N>) -> Option<M>) -> GraphParams<M> {
        GraphParams {
            graph_id: self.graph_id.clone(),
            graph_preprocessing: self.graph_preprocessing.clone(),
            graph_creation: self.graph_creation.map_numeric(f),
            graph_styling: self.graph_styling.map_numeric(f),
            extra: self.extra.clone(),
        }
    }
}

impl<N> GraphCreation<N> {
    fn map_numeric<M>(&self, f: &impl Fn(Option<&N>) -> Option<M>) -> GraphCreation<M> {
        GraphCreation {
            graph_type: self.graph_type,
            sheet_index: self.sheet_index,
            x_axis_column_ids: self.x_axis_column_ids.clone(),
            y_axis_column_ids: self.y_axis_column_ids.clone(),
            color: self.color.clone(),
            facet_col_column_id: self.facet_col_column_id.clone(),
            facet_row_column_id: self.facet_row_column_id.clone(),
            facet_col_wrap: f(self.facet_col_wrap.as_ref()),
            facet_col_spacing: f(self.facet_col_spacing.as_ref()),
            facet_row_spacing: f(self.facet_row_spacing.as_ref()),
            points: self.points.clone(),
            line_shape: self.line_shape.clone(),
            nbins: f(self.nbins.as_ref()),
            histnorm: self.histnorm.clone(),
            histfunc: self.histfunc.clone(),
            extra: self.extra.clone(),
        }
    }
}

impl<N> GraphStyling<N> {
    fn map_numeric<M>(&self, f: &impl Fn(Option<&N>) -> Option<M>) -> GraphStyling<M> {
        GraphStyling {
            title: self.title.clone(),
            xaxis: self.xaxis.map_numeric(f),
            yaxis: self.yaxis.map_numeric(f),
            showlegend: self.showlegend,
            legend: LegendStyle {
                title: self.legend.title.clone(),
                orientation: self.legend.orientation.clone(),
                x: f(self.legend.x.as_ref()),
                y: f(self.legend.y.as_ref()),
                extra: self.legend.extra.clone(),
            },
            paper_bgcolor: self.paper_bgcolor.clone(),
            plot_bgcolor: self.plot_bgcolor.clone(),
            barmode: self.barmode.clone(),
            barnorm: self.barnorm.clone(),
            extra: self.extra.clone(),
        }
    }
}

impl<N> AxisStyle<N> {
    fn map_numeric<M>(&self, f: &impl Fn(Option<&N>) -> Option<M>) -> AxisStyle<M> {
        AxisStyle {
            title: self.title.clone(),
            visible: self.visible,
            title_font_color: self.title_font_color.clone(),
            axis_type: self.axis_type.clone(),
            showgrid: self.showgrid,
            gridwidth: f(self.gridwidth.as_ref()),
            rangeslider: self.rangeslider.clone(),
            extra: self.extra.clone(),
        }
    }
}

impl GraphParamsFrontend {
    /// Default params for a new graph
    #[must_use]
    pub fn new_default(
        graph_id: impl Into<GraphId>,
        sheet_index: usize,
        graph_type: GraphType,
    ) -> Self {
        let axis = |rangeslider| AxisStyle {
            visible: true,
            title_font_color: DEFAULT_TITLE_FONT_COLOR.to_string(),
            showgrid: true,
            rangeslider,
            ..AxisStyle::default()
        };

        Self {
            graph_id: graph_id.into(),
            graph_preprocessing: GraphPreprocessing {
                safety_filter_turned_on_by_user: true,
                extra: ExtraFields::new(),
            },
            graph_creation: GraphCreation {
                graph_type,
                sheet_index,
                points: graph_type.has_points().then(|| "outliers".to_string()),
                line_shape: graph_type.has_line_shape().then(|| "linear".to_string()),
                histfunc: graph_type.has_histfunc().then(|| "count".to_string()),
                ..GraphCreation::default()
            },
            graph_styling: GraphStyling {
                title: TitleStyle {
                    visible: true,
                    title_font_color: DEFAULT_TITLE_FONT_COLOR.to_string(),
                    ..TitleStyle::default()
                },
                xaxis: axis(Some(RangeSlider {
                    visible: true,
                    extra: ExtraFields::new(),
                })),
                yaxis: axis(None),
                showlegend: true,
                legend: LegendStyle {
                    orientation: "v".to_string(),
                    ..LegendStyle::default()
                },
                paper_bgcolor: DEFAULT_PAPER_BGCOLOR.to_string(),
                plot_bgcolor: DEFAULT_PLOT_BGCOLOR.to_string(),
                barmode: graph_type.has_barmode().then(|| "group".to_string()),
                ..GraphStyling::default()
            },
            extra: ExtraFields::new(),
        }
    }

    /// Paths of numeric fields holding text that is not a finite number
    ///
    /// These fields are dropped by [`GraphCodec::to_wire`]; the taskpane
    /// should flag them.
    #[must_use]
    pub fn invalid_numeric_fields(&self) -> Vec<&'static str> {
        let creation = &self.graph_creation;
        let styling = &self.graph_styling;
        [
            ("graph_creation.facet_col_wrap", &creation.facet_col_wrap),
            ("graph_creation.facet_col_spacing", &creation.facet_col_spacing),
            ("graph_creation.facet_row_spacing", &creation.facet_row_spacing),
            ("graph_creation.nbins", &creation.nbins),
            ("graph_styling.xaxis.gridwidth", &styling.xaxis.gridwidth),
            ("graph_styling.yaxis.gridwidth", &styling.yaxis.gridwidth),
            ("graph_styling.legend.x", &styling.legend.x),
            ("graph_styling.legend.y", &styling.legend.y),
        ]
        .into_iter()
        .filter(|(_, value)| parse_numeric(value.as_deref()).is_invalid())
        .map(|(path, _)| path)
        .collect()
    }
}

/// Codec between [`GraphParamsFrontend`] and [`GraphParamsBackend`]
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphCodec;

impl ParamCodec for GraphCodec {
    type Frontend = GraphParamsFrontend;
    type Wire = GraphParamsBackend;

    fn to_wire(&self, frontend: &GraphParamsFrontend) -> GraphParamsBackend {
        frontend.map_numeric(&string_to_number)
    }

    fn to_frontend(&self, wire: &GraphParamsBackend) -> GraphParamsFrontend {
        wire.map_numeric(&number_to_string)
    }
}
