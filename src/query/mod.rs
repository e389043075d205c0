mod model;
mod reader;
mod tabular;

pub use model::{insert_param, parse_query_string, HttpMethod, ParamValue, Params, Query};
pub use reader::{parse_key_map, read_queries, QuerySource};
