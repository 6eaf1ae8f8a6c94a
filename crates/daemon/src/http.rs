// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Upstream HTTP access over reqwest.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use lifeline_core::{Error as CoreError, Method, Network, Request, Response};

use crate::config::Config;
use crate::error::Result;

pub struct HttpNetwork {
    client: reqwest::Client,
}

impl HttpNetwork {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .connect_timeout(config.http_connect_timeout())
            .user_agent(concat!("lifelined/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(HttpNetwork { client })
    }

    async fn execute(&self, request: &Request) -> lifeline_core::Result<Response> {
        let url = request.parsed_url()?;
        let mut builder = self.client.request(to_reqwest_method(request.method), url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let resp = builder.send().await.map_err(classify)?;
        let status = resp.status().as_u16();
        let mut headers = BTreeMap::new();
        for (name, value) in resp.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_string(), value.to_string());
            }
        }
        let body = resp.bytes().await.map_err(classify)?;
        let mut response = Response::new(status, body.to_vec());
        response.headers = headers;
        Ok(response)
    }
}

impl Network for HttpNetwork {
    fn send<'a>(
        &'a self,
        request: &'a Request,
    ) -> Pin<Box<dyn Future<Output = lifeline_core::Result<Response>> + Send + 'a>> {
        Box::pin(self.execute(request))
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Head => reqwest::Method::HEAD,
        Method::Options => reqwest::Method::OPTIONS,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

/// Anything that kept the request from completing an exchange with the
/// server counts as the network being unavailable. A request reqwest could
/// not even build is the caller's fault.
fn classify(e: reqwest::Error) -> CoreError {
    if e.is_builder() {
        return CoreError::InvalidInput(e.to_string());
    }
    CoreError::NetworkUnavailable(e.to_string())
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
