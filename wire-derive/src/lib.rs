//! Derive macros for `dusk-ssh`'s wire-format traits (`SSHEncode`/`SSHDecode`).
//!
//! Walks struct and enum definitions to generate sequential field
//! encode/decode impls, built on `syn`/`quote` rather than a hand-rolled
//! token walker.
//!
//! Three shapes are supported:
//!
//! - A plain struct: fields are encoded/decoded in declaration order.
//! - `#[sshwire(variant_prefix)]` on an enum: the wire form is a name
//!   string immediately followed by the matching variant's single field.
//!   One variant may carry `#[sshwire(unknown)]`, taking an unrecognised
//!   name as a fallback (its field must be constructible from `&str`,
//!   i.e. [`Unknown`]).
//! - `#[sshwire(external_tag)]` on an enum: like `variant_prefix`, but the
//!   tag and payload aren't adjacent on the wire (other fixed fields of
//!   the containing packet sit between them). Rather than a full
//!   `SSHEncode`/`SSHDecode` impl, this generates `variant_name`,
//!   `enc_payload` and `dec_payload` inherent methods for a hand-written
//!   outer impl to call at the right point.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, LitStr, Variant};

#[proc_macro_derive(SSHEncode, attributes(sshwire))]
pub fn derive_ssh_encode(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_encode(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

#[proc_macro_derive(SSHDecode, attributes(sshwire))]
pub fn derive_ssh_decode(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_decode(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// What this container looks like on the wire, decided by its `#[sshwire(..)]`
/// attribute (or lack of one).
enum Shape {
    Sequential,
    VariantPrefix,
    ExternalTag,
}

fn container_shape(input: &DeriveInput) -> syn::Result<Shape> {
    for attr in &input.attrs {
        if !attr.path().is_ident("sshwire") {
            continue;
        }
        let mut shape = None;
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("variant_prefix") {
                shape = Some(Shape::VariantPrefix);
            } else if meta.path.is_ident("external_tag") {
                shape = Some(Shape::ExternalTag);
            }
            Ok(())
        })?;
        if let Some(shape) = shape {
            return Ok(shape);
        }
    }
    Ok(Shape::Sequential)
}

struct VariantTag {
    variant: Variant,
    name: Option<LitStr>,
    is_unknown: bool,
}

fn variant_tags(variants: &syn::punctuated::Punctuated<Variant, syn::Token![,]>) -> syn::Result<Vec<VariantTag>> {
    let mut out = Vec::new();
    for variant in variants {
        let mut name = None;
        let mut is_unknown = false;
        for attr in &variant.attrs {
            if !attr.path().is_ident("sshwire") {
                continue;
            }
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("unknown") {
                    is_unknown = true;
                } else if meta.path.is_ident("variant") {
                    let value = meta.value()?;
                    name = Some(value.parse::<LitStr>()?);
                }
                Ok(())
            })?;
        }
        out.push(VariantTag { variant: variant.clone(), name, is_unknown });
    }
    Ok(out)
}

fn single_field_ident(variant: &Variant) -> syn::Result<TokenStream2> {
    match &variant.fields {
        Fields::Unnamed(f) if f.unnamed.len() == 1 => Ok(quote!()),
        _ => Err(syn::Error::new_spanned(
            &variant.fields,
            "sshwire variant_prefix/external_tag enums require exactly one unnamed field per variant",
        )),
    }
}

fn expand_encode(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    match container_shape(input)? {
        Shape::Sequential => match &input.data {
            Data::Struct(s) => {
                let fields = sequential_field_idents(&s.fields);
                let pushes = fields.iter().map(|f| quote! { self.#f.enc(s)?; });
                Ok(quote! {
                    impl #impl_generics crate::sshwire::SSHEncode for #name #ty_generics #where_clause {
                        fn enc<S: crate::sshwire::SSHSink>(&self, s: &mut S) -> crate::sshwire::WireResult<()> {
                            #(#pushes)*
                            Ok(())
                        }
                    }
                })
            }
            _ => Err(syn::Error::new_spanned(
                &input.ident,
                "sequential encoding only supports structs; tag enums need #[sshwire(variant_prefix)] or #[sshwire(external_tag)]",
            )),
        },
        Shape::VariantPrefix => {
            let Data::Enum(e) = &input.data else {
                return Err(syn::Error::new_spanned(&input.ident, "variant_prefix requires an enum"));
            };
            let tags = variant_tags(&e.variants)?;
            let mut arms = Vec::new();
            for t in &tags {
                let _ = single_field_ident(&t.variant)?;
                let vname = &t.variant.ident;
                if t.is_unknown {
                    arms.push(quote! {
                        Self::#vname(inner) => { inner.0.enc(s)?; }
                    });
                } else {
                    let lit = t.name.as_ref().ok_or_else(|| {
                        syn::Error::new_spanned(&t.variant, "non-unknown variant needs #[sshwire(variant = \"...\")]")
                    })?;
                    arms.push(quote! {
                        Self::#vname(inner) => {
                            #lit.enc(s)?;
                            inner.enc(s)?;
                        }
                    });
                }
            }
            Ok(quote! {
                impl #impl_generics crate::sshwire::SSHEncode for #name #ty_generics #where_clause {
                    fn enc<S: crate::sshwire::SSHSink>(&self, s: &mut S) -> crate::sshwire::WireResult<()> {
                        match self {
                            #(#arms)*
                        }
                        Ok(())
                    }
                }
            })
        }
        Shape::ExternalTag => {
            let Data::Enum(e) = &input.data else {
                return Err(syn::Error::new_spanned(&input.ident, "external_tag requires an enum"));
            };
            let tags = variant_tags(&e.variants)?;
            let mut name_arms = Vec::new();
            let mut payload_arms = Vec::new();
            for t in &tags {
                let _ = single_field_ident(&t.variant)?;
                let vname = &t.variant.ident;
                if t.is_unknown {
                    name_arms.push(quote! { Self::#vname(inner) => inner.0, });
                    payload_arms.push(quote! { Self::#vname(_inner) => Ok(()), });
                } else {
                    let lit = t.name.as_ref().ok_or_else(|| {
                        syn::Error::new_spanned(&t.variant, "non-unknown variant needs #[sshwire(variant = \"...\")]")
                    })?;
                    name_arms.push(quote! { Self::#vname(_inner) => #lit, });
                    payload_arms.push(quote! { Self::#vname(inner) => inner.enc(s), });
                }
            }
            Ok(quote! {
                impl #impl_generics #name #ty_generics #where_clause {
                    pub fn variant_name(&self) -> &str {
                        match self {
                            #(#name_arms)*
                        }
                    }
                    pub fn enc_payload<S: crate::sshwire::SSHSink>(&self, s: &mut S) -> crate::sshwire::WireResult<()> {
                        match self {
                            #(#payload_arms)*
                        }
                    }
                }
            })
        }
    }
}

fn expand_decode(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let de_lifetime = syn::Lifetime::new("'de", proc_macro2::Span::call_site());

    // Decode impls need a `'de` lifetime bounding any data lifetime the type
    // carries, e.g. `impl<'de: 'a, 'a> SSHDecode<'de> for Foo<'a>`.
    let data_lifetimes: Vec<_> = input
        .generics
        .lifetimes()
        .map(|l| l.lifetime.clone())
        .collect();
    let (_, ty_generics, _) = input.generics.split_for_impl();

    let bounds = if data_lifetimes.is_empty() {
        quote! { #de_lifetime }
    } else {
        quote! { #de_lifetime: #(#data_lifetimes)+*, #(#data_lifetimes),* }
    };

    match container_shape(input)? {
        Shape::Sequential => match &input.data {
            Data::Struct(s) => {
                let (build, _is_tuple) = build_struct_fields(&s.fields)?;
                Ok(quote! {
                    impl<#bounds> crate::sshwire::SSHDecode<#de_lifetime> for #name #ty_generics {
                        fn dec<S: crate::sshwire::SSHSource<#de_lifetime>>(s: &mut S) -> crate::sshwire::WireResult<Self> {
                            Ok(#build)
                        }
                    }
                })
            }
            _ => Err(syn::Error::new_spanned(&input.ident, "sequential decoding only supports structs")),
        },
        Shape::VariantPrefix => {
            let Data::Enum(e) = &input.data else {
                return Err(syn::Error::new_spanned(&input.ident, "variant_prefix requires an enum"));
            };
            let tags = variant_tags(&e.variants)?;
            let mut arms = Vec::new();
            let mut unknown_arm = None;
            for t in &tags {
                let vname = &t.variant.ident;
                if t.is_unknown {
                    unknown_arm = Some(quote! { name => Self::#vname(crate::sshwire::Unknown(name)), });
                } else {
                    let lit = t.name.as_ref().ok_or_else(|| {
                        syn::Error::new_spanned(&t.variant, "non-unknown variant needs #[sshwire(variant = \"...\")]")
                    })?;
                    arms.push(quote! { #lit => Self::#vname(crate::sshwire::SSHDecode::dec(s)?), });
                }
            }
            let unknown_arm = unknown_arm.ok_or_else(|| {
                syn::Error::new_spanned(&input.ident, "variant_prefix enum needs one #[sshwire(unknown)] variant")
            })?;
            Ok(quote! {
                impl<#bounds> crate::sshwire::SSHDecode<#de_lifetime> for #name #ty_generics {
                    fn dec<S: crate::sshwire::SSHSource<#de_lifetime>>(s: &mut S) -> crate::sshwire::WireResult<Self> {
                        let name: &#de_lifetime str = crate::sshwire::SSHDecode::dec(s)?;
                        Ok(match name {
                            #(#arms)*
                            #unknown_arm
                        })
                    }
                }
            })
        }
        Shape::ExternalTag => {
            let Data::Enum(e) = &input.data else {
                return Err(syn::Error::new_spanned(&input.ident, "external_tag requires an enum"));
            };
            let tags = variant_tags(&e.variants)?;
            let mut arms = Vec::new();
            let mut unknown_arm = None;
            for t in &tags {
                let vname = &t.variant.ident;
                if t.is_unknown {
                    unknown_arm = Some(quote! { name => Self::#vname(crate::sshwire::Unknown(name)), });
                } else {
                    let lit = t.name.as_ref().ok_or_else(|| {
                        syn::Error::new_spanned(&t.variant, "non-unknown variant needs #[sshwire(variant = \"...\")]")
                    })?;
                    arms.push(quote! { #lit => Self::#vname(crate::sshwire::SSHDecode::dec(s)?), });
                }
            }
            let unknown_arm = unknown_arm.ok_or_else(|| {
                syn::Error::new_spanned(&input.ident, "external_tag enum needs one #[sshwire(unknown)] variant")
            })?;
            Ok(quote! {
                impl<#bounds> #name #ty_generics {
                    pub fn dec_payload<S: crate::sshwire::SSHSource<#de_lifetime>>(
                        name: &#de_lifetime str,
                        s: &mut S,
                    ) -> crate::sshwire::WireResult<Self> {
                        Ok(match name {
                            #(#arms)*
                            #unknown_arm
                        })
                    }
                }
            })
        }
    }
}

/// Field accessors in declaration order, for a plain struct (named or tuple).
fn sequential_field_idents(fields: &Fields) -> Vec<TokenStream2> {
    match fields {
        Fields::Named(f) => f
            .named
            .iter()
            .map(|field| {
                let ident = field.ident.as_ref().expect("named field");
                quote! { #ident }
            })
            .collect(),
        Fields::Unnamed(f) => (0..f.unnamed.len())
            .map(|i| {
                let idx = syn::Index::from(i);
                quote! { #idx }
            })
            .collect(),
        Fields::Unit => Vec::new(),
    }
}

/// Builds the `Self { ... }` or `Self(...)` construction expression for a
/// struct's decode impl, decoding each field in order.
fn build_struct_fields(fields: &Fields) -> syn::Result<(TokenStream2, bool)> {
    match fields {
        Fields::Named(f) => {
            let inits = f.named.iter().map(|field| {
                let ident = field.ident.as_ref().expect("named field");
                quote! { #ident: crate::sshwire::SSHDecode::dec(s)? }
            });
            Ok((quote! { Self { #(#inits),* } }, false))
        }
        Fields::Unnamed(f) => {
            let inits = f.unnamed.iter().map(|_| quote! { crate::sshwire::SSHDecode::dec(s)? });
            Ok((quote! { Self( #(#inits),* ) }, true))
        }
        Fields::Unit => Ok((quote! { Self }, false)),
    }
}

