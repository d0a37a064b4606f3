// Copyright 2024 The Chameleon Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use proc_macro::TokenStream;
use quote::quote;
use syn::{ItemFn, parse_macro_input};

/// Runs an async test on a tokio runtime with tracing initialised and the
/// test body wrapped in a span named after the test.
///
/// Arguments are forwarded to `#[tokio::test]`, so
/// `#[chameleon_test(flavor = "multi_thread", worker_threads = 4)]` works.
#[proc_macro_attribute]
pub fn chameleon_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let attr = proc_macro2::TokenStream::from(attr);
    let input_fn = parse_macro_input!(item as ItemFn);

    let fn_name = &input_fn.sig.ident;
    let fn_block = &input_fn.block;
    let fn_inputs = &input_fn.sig.inputs;
    let fn_output = &input_fn.sig.output;
    let fn_attr = &input_fn.attrs;

    let expanded = quote! {
        #(#fn_attr)*
        #[::tokio::test(#attr)]
        async fn #fn_name(#fn_inputs) #fn_output {
            // Error means already initialized, which is ok.
            let _ = ::chameleon_util::init_tracing();

            ::chameleon_util::__tracing::Instrument::instrument(
                async move #fn_block,
                ::chameleon_util::__tracing::error_span!(stringify!(#fn_name)),
            )
            .await
        }
    };

    TokenStream::from(expanded)
}
