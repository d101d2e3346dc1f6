use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    Attribute, Data, DeriveInput, Fields, Ident, LitStr, Type, parse_macro_input, spanned::Spanned,
};

const COUNT_RELATION_PREFIX: &str = "_count_relation:";
const COUNT_DESCENDANT_PREFIX: &str = "_count_descendant:";

#[proc_macro_derive(Entity, attributes(entity, property))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_entity(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

#[proc_macro_derive(Properties, attributes(property))]
pub fn derive_properties(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_properties(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Default)]
struct EntityOptions {
    key: Option<String>,
    hashed_id: bool,
    immutable: bool,
    store_mutations: bool,
    time_series: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Capability {
    Base,
    Child,
    TimeSeries,
}

enum FieldRole {
    Property { raw: String, name: String },
    Count { raw: String, name: String },
    Capability(Capability),
    Skipped,
}

struct ParsedField {
    ident: Ident,
    ty: Type,
    role: FieldRole,
}

fn expand_entity(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = input.ident.clone();
    let options = parse_entity_options(&input.attrs)?;
    let fields = parse_fields(&input, true)?;

    let base_field = single_capability(&fields, Capability::Base, &struct_name)?.ok_or_else(|| {
        syn::Error::new(
            struct_name.span(),
            "Entity requires a `#[entity(base)]` field of type BaseEntity",
        )
    })?;
    let child_field = single_capability(&fields, Capability::Child, &struct_name)?;
    let series_field = single_capability(&fields, Capability::TimeSeries, &struct_name)?;

    let properties_impl = properties_impl(&struct_name, &fields);

    let struct_name_str = struct_name.to_string();
    let key_expr = match options.key {
        Some(key) => quote! { #key.to_string() },
        None => quote! { ::storecheck::schema::schema_key(module_path!(), #struct_name_str) },
    };

    let hashed_id = options.hashed_id;
    let immutable = options.immutable;
    let store_mutations = options.store_mutations;
    let time_series = options.time_series || series_field.is_some();

    let child_accessors = match child_field {
        Some(field) => quote! {
            fn child_link(&self) -> Option<&::storecheck::marshal::ChildLink> {
                Some(&self.#field)
            }

            fn child_link_mut(&mut self) -> Option<&mut ::storecheck::marshal::ChildLink> {
                Some(&mut self.#field)
            }
        },
        None => quote! {},
    };

    let series_accessors = match series_field {
        Some(field) => quote! {
            fn time_series(&self) -> Option<&::storecheck::marshal::TimeSeriesInput> {
                Some(&self.#field)
            }

            fn time_series_mut(&mut self) -> Option<&mut ::storecheck::marshal::TimeSeriesInput> {
                Some(&mut self.#field)
            }
        },
        None => quote! {},
    };

    Ok(quote! {
        #properties_impl

        impl ::storecheck::marshal::Entity for #struct_name {
            fn schema_key() -> String {
                #key_expr
            }

            fn type_options() -> ::storecheck::schema::TypeOptions {
                ::storecheck::schema::TypeOptions {
                    hashed_id: #hashed_id,
                    immutable: #immutable,
                    store_mutations: #store_mutations,
                    time_series: #time_series,
                }
            }

            fn base(&self) -> &::storecheck::marshal::BaseEntity {
                &self.#base_field
            }

            fn base_mut(&mut self) -> &mut ::storecheck::marshal::BaseEntity {
                &mut self.#base_field
            }

            #child_accessors
            #series_accessors
        }
    })
}

fn expand_properties(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = input.ident.clone();
    let fields = parse_fields(&input, false)?;
    let properties_impl = properties_impl(&struct_name, &fields);

    Ok(quote! {
        #properties_impl

        impl ::storecheck::marshal::Property for #struct_name {
            fn describe(
                path: &str,
                spec: &::storecheck::schema::FieldSpec,
                out: &mut Vec<::storecheck::schema::PropertyDescriptor>,
            ) -> ::storecheck::Result<()> {
                let flags = ::storecheck::marshal::nested_flags(path, spec)?;
                <Self as ::storecheck::marshal::Properties>::describe_properties(path, &flags, out)
            }

            fn encode(&self, path: &str, encoder: &mut ::storecheck::marshal::Encoder<'_>) {
                ::storecheck::marshal::Properties::encode_properties(self, path, encoder)
            }

            fn decode(
                &mut self,
                path: &str,
                decoder: &::storecheck::marshal::Decoder<'_>,
            ) -> ::storecheck::Result<()> {
                ::storecheck::marshal::Properties::decode_properties(self, path, decoder)
            }

            fn mark_clean(&mut self) {
                ::storecheck::marshal::Properties::mark_properties_clean(self)
            }

            fn mark_selected_clean(&mut self, path: &str, selection: &[String]) {
                ::storecheck::marshal::Properties::mark_selected_properties_clean(self, path, selection)
            }
        }
    })
}

fn properties_impl(struct_name: &Ident, fields: &[ParsedField]) -> TokenStream2 {
    let mut describe = Vec::new();
    let mut encode = Vec::new();
    let mut decode = Vec::new();
    let mut clean = Vec::new();
    let mut clean_selected = Vec::new();

    for field in fields {
        let ident = &field.ident;
        let ty = &field.ty;
        let ident_str = ident.to_string();
        match &field.role {
            FieldRole::Property { raw, name } => {
                describe.push(quote! {
                    ::storecheck::marshal::describe_field::<#ty>(prefix, #raw, #ident_str, inherited, out)?;
                });
                encode.push(quote! {
                    ::storecheck::marshal::Property::encode(
                        &self.#ident,
                        &::storecheck::core::join_path(prefix, #name),
                        encoder,
                    );
                });
                decode.push(quote! {
                    ::storecheck::marshal::Property::decode(
                        &mut self.#ident,
                        &::storecheck::core::join_path(prefix, #name),
                        decoder,
                    )?;
                });
                clean.push(quote! {
                    ::storecheck::marshal::Property::mark_clean(&mut self.#ident);
                });
                clean_selected.push(quote! {
                    ::storecheck::marshal::Property::mark_selected_clean(
                        &mut self.#ident,
                        &::storecheck::core::join_path(prefix, #name),
                        selection,
                    );
                });
            }
            FieldRole::Count { raw, name } => {
                describe.push(quote! {
                    ::storecheck::marshal::describe_count::<#ty>(#raw, #ident_str, out)?;
                });
                decode.push(quote! {
                    ::storecheck::marshal::Property::decode(&mut self.#ident, #name, decoder)?;
                });
            }
            FieldRole::Capability(_) | FieldRole::Skipped => {}
        }
    }

    quote! {
        impl ::storecheck::marshal::Properties for #struct_name {
            #[allow(unused_variables)]
            fn describe_properties(
                prefix: &str,
                inherited: &::storecheck::schema::PropertyFlags,
                out: &mut Vec<::storecheck::schema::PropertyDescriptor>,
            ) -> ::storecheck::Result<()> {
                #(#describe)*
                Ok(())
            }

            #[allow(unused_variables)]
            fn encode_properties(&self, prefix: &str, encoder: &mut ::storecheck::marshal::Encoder<'_>) {
                #(#encode)*
            }

            #[allow(unused_variables)]
            fn decode_properties(
                &mut self,
                prefix: &str,
                decoder: &::storecheck::marshal::Decoder<'_>,
            ) -> ::storecheck::Result<()> {
                #(#decode)*
                Ok(())
            }

            fn mark_properties_clean(&mut self) {
                #(#clean)*
            }

            #[allow(unused_variables)]
            fn mark_selected_properties_clean(&mut self, prefix: &str, selection: &[String]) {
                #(#clean_selected)*
            }
        }
    }
}

fn parse_fields(input: &DeriveInput, allow_capabilities: bool) -> syn::Result<Vec<ParsedField>> {
    let struct_name = &input.ident;
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "storecheck derives do not support generic structs",
        ));
    }

    let data_struct = match &input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new(
                struct_name.span(),
                "storecheck derives can only be used on structs",
            ));
        }
    };

    let named = match &data_struct.fields {
        Fields::Named(fields) => fields,
        _ => {
            return Err(syn::Error::new(
                struct_name.span(),
                "storecheck derives require named fields",
            ));
        }
    };

    let mut parsed = Vec::new();
    for field in &named.named {
        let ident = field
            .ident
            .clone()
            .ok_or_else(|| syn::Error::new(field.span(), "storecheck derives require named fields"))?;

        let capability = parse_capability(&field.attrs)?;
        let annotation = parse_property_annotation(&field.attrs)?;

        let role = match (capability, annotation) {
            (Some(_), Some(_)) => {
                return Err(syn::Error::new(
                    ident.span(),
                    "a capability field cannot also carry #[property]",
                ));
            }
            (Some(capability), None) => {
                if !allow_capabilities {
                    return Err(syn::Error::new(
                        ident.span(),
                        "#[entity(..)] field markers are only valid on #[derive(Entity)] types",
                    ));
                }
                FieldRole::Capability(capability)
            }
            (None, annotation) => {
                let raw = annotation.unwrap_or_default();
                resolve_role(&ident, raw)
            }
        };

        parsed.push(ParsedField {
            ident,
            ty: field.ty.clone(),
            role,
        });
    }
    Ok(parsed)
}

fn resolve_role(ident: &Ident, raw: String) -> FieldRole {
    let declared = raw.split(',').next().unwrap_or("").trim().to_string();
    let name = if declared.is_empty() {
        ident.to_string().trim_start_matches("r#").to_string()
    } else {
        declared
    };

    if name == "-" {
        FieldRole::Skipped
    } else if name.starts_with(COUNT_RELATION_PREFIX) || name.starts_with(COUNT_DESCENDANT_PREFIX) {
        FieldRole::Count { raw, name }
    } else {
        FieldRole::Property { raw, name }
    }
}

fn single_capability(
    fields: &[ParsedField],
    capability: Capability,
    struct_name: &Ident,
) -> syn::Result<Option<Ident>> {
    let mut found = fields
        .iter()
        .filter(|f| matches!(f.role, FieldRole::Capability(c) if c == capability));
    let first = found.next().map(|f| f.ident.clone());
    if found.next().is_some() {
        return Err(syn::Error::new(
            struct_name.span(),
            "each entity capability may be declared on one field only",
        ));
    }
    Ok(first)
}

fn parse_entity_options(attrs: &[Attribute]) -> syn::Result<EntityOptions> {
    let mut options = EntityOptions::default();
    for attr in attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("key") {
                let value = meta.value()?;
                let lit: LitStr = value.parse()?;
                options.key = Some(lit.value());
                return Ok(());
            }

            if meta.path.is_ident("hashed_id") {
                options.hashed_id = true;
                return Ok(());
            }

            if meta.path.is_ident("immutable") {
                options.immutable = true;
                return Ok(());
            }

            if meta.path.is_ident("store_mutations") {
                options.store_mutations = true;
                return Ok(());
            }

            if meta.path.is_ident("time_series") {
                options.time_series = true;
                return Ok(());
            }

            Err(meta.error("unsupported entity option"))
        })?;
    }
    Ok(options)
}

fn parse_capability(attrs: &[Attribute]) -> syn::Result<Option<Capability>> {
    let mut capability = None;
    for attr in attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            let parsed = if meta.path.is_ident("base") {
                Capability::Base
            } else if meta.path.is_ident("child") {
                Capability::Child
            } else if meta.path.is_ident("time_series") {
                Capability::TimeSeries
            } else {
                return Err(meta.error("unsupported field marker, expected base, child or time_series"));
            };

            if capability.replace(parsed).is_some() {
                return Err(meta.error("a field may carry only one capability marker"));
            }
            Ok(())
        })?;
    }
    Ok(capability)
}

fn parse_property_annotation(attrs: &[Attribute]) -> syn::Result<Option<String>> {
    let mut annotation = None;
    for attr in attrs {
        if !attr.path().is_ident("property") {
            continue;
        }
        if annotation.is_some() {
            return Err(syn::Error::new(attr.span(), "duplicate #[property] attribute"));
        }
        let lit: LitStr = attr.parse_args()?;
        annotation = Some(lit.value());
    }
    Ok(annotation)
}
