//! `ConversionReview` handling for the API server's conversion webhook

use kube::core::conversion::{ConversionRequest, ConversionResponse, ConversionReview};
use kube::core::response::Status;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{convert, ChannelVersion, ConversionError};

/// Answer a `ConversionReview`.
///
/// Every object is converted to the requested version. A single failure
/// fails the whole review; the API server never sees a partial result.
pub fn convert_review(review: ConversionReview) -> ConversionReview {
    let request = match ConversionRequest::from_review(review) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "conversion review carried no request");
            return ConversionResponse::invalid(Status::failure(&e.to_string(), "InvalidRequest"))
                .into_review();
        }
    };

    let desired = request.desired_api_version.clone();
    let count = request.objects.len();
    match convert_objects(&request.objects, &desired) {
        Ok(converted) => {
            debug!(uid = %request.uid, desired = %desired, count, "converted objects");
            ConversionResponse::for_request(request)
                .success(converted)
                .into_review()
        }
        Err(e) => {
            warn!(uid = %request.uid, desired = %desired, error = %e, "conversion failed");
            ConversionResponse::for_request(request)
                .failure(Status::failure(&e.to_string(), e.reason()))
                .into_review()
        }
    }
}

fn convert_objects(objects: &[Value], desired: &str) -> Result<Vec<Value>, ConversionError> {
    objects
        .iter()
        .map(|obj| {
            let obj = ChannelVersion::from_value(obj.clone())?;
            convert(obj, desired)?.into_value()
        })
        .collect()
}
